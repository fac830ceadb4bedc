pub mod attack_engine;
pub mod candidates;
pub mod cluster;
pub mod config;
pub mod database;
pub mod election;
pub mod error;
pub mod hashing;
pub mod heartbeat;
pub mod job_coordinator;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod node;
pub mod partitioner;
pub mod range_codec;
pub mod routes;
pub mod rpc;
pub mod worker;
pub mod worker_processing;
pub mod worker_scheduler;
