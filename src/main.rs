use anyhow::Context;
use crackfleet::config::Config;
use crackfleet::node::FleetNode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();
  let config = Config::from_env().context("Failed to load configuration")?;
  FleetNode::build(config).await?.run().await
}
