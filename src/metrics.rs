//! Local load sampling behind the [`SystemMetrics`] capability.

use std::sync::{Arc, Mutex};

use sysinfo::{Disks, System};

use crate::models::LoadMetrics;

pub trait SystemMetrics: Send + Sync {
  fn sample(&self) -> LoadMetrics;
}

/// Fixed metrics for tests and simulated nodes.
#[derive(Debug, Clone, Default)]
pub struct StaticMetrics(pub LoadMetrics);

impl StaticMetrics {
  pub fn idle() -> Self {
    Self(LoadMetrics {
      cpu_cores: num_cpus::get() as u32,
      ram_total_mb: 1024,
      ..LoadMetrics::default()
    })
  }
}

impl SystemMetrics for StaticMetrics {
  fn sample(&self) -> LoadMetrics {
    self.0.clone()
  }
}

/// Host metrics through `sysinfo`. CPU usage is measured between samples,
/// so the first one after startup reads low.
pub struct HostMetrics {
  system: Mutex<System>,
}

impl HostMetrics {
  pub fn new() -> Self {
    let mut system = System::new();
    system.refresh_cpu_usage();
    system.refresh_memory();
    Self {
      system: Mutex::new(system),
    }
  }
}

impl Default for HostMetrics {
  fn default() -> Self {
    Self::new()
  }
}

impl SystemMetrics for HostMetrics {
  fn sample(&self) -> LoadMetrics {
    let (cpu_usage, used, total, cores) = match self.system.lock() {
      Ok(mut system) => {
        system.refresh_cpu_usage();
        system.refresh_memory();
        (
          system.global_cpu_usage() as f64,
          system.used_memory(),
          system.total_memory(),
          system.cpus().len(),
        )
      }
      Err(_) => (0.0, 0, 0, 0),
    };
    let disks = Disks::new_with_refreshed_list();
    let spaces: Vec<(u64, u64)> = disks
      .list()
      .iter()
      .map(|d| (d.total_space(), d.available_space()))
      .collect();

    LoadMetrics {
      cpu_usage,
      memory_usage: percent_used(used, total),
      disk_usage: disk_usage(&spaces),
      load_average: System::load_average().one,
      cpu_cores: if cores == 0 { num_cpus::get() as u32 } else { cores as u32 },
      ram_total_mb: total / (1024 * 1024),
    }
  }
}

/// The metrics source for this host.
pub fn platform_metrics() -> Arc<dyn SystemMetrics> {
  Arc::new(HostMetrics::new())
}

fn percent_used(used: u64, total: u64) -> f64 {
  if total == 0 {
    return 0.0;
  }
  100.0 * used.min(total) as f64 / total as f64
}

/// Used share across all mounted disks, from `(total, available)` bytes.
fn disk_usage(spaces: &[(u64, u64)]) -> f64 {
  let total: u64 = spaces.iter().map(|(t, _)| t).sum();
  let available: u64 = spaces.iter().map(|(t, a)| (*a).min(*t)).sum();
  percent_used(total - available, total)
}
