pub mod cgroup;
pub mod cli;
pub mod daemon;

use std::time::Duration;

use crate::device::HealthProbeConfig;
use crate::plugin::BackoffPolicy;
use crate::plugin::PluginConfig;

impl From<&daemon::DaemonArgs> for PluginConfig {
    fn from(args: &daemon::DaemonArgs) -> Self {
        Self {
            plugin_dir: args.plugin_dir.clone(),
            socket_name: args.socket_name.clone(),
        }
    }
}

impl From<&daemon::DaemonArgs> for HealthProbeConfig {
    fn from(args: &daemon::DaemonArgs) -> Self {
        Self {
            interval: Duration::from_secs(args.health_interval_secs.max(1)),
            failure_threshold: args.health_failure_threshold.max(1),
            max_backoff: Duration::from_secs(args.health_max_backoff_secs),
        }
    }
}

impl From<&daemon::DaemonArgs> for BackoffPolicy {
    fn from(args: &daemon::DaemonArgs) -> Self {
        Self {
            initial: Duration::from_millis(args.registration_backoff_initial_ms),
            max: Duration::from_millis(args.registration_backoff_max_ms),
            max_attempts: args.registration_max_attempts.max(1),
        }
    }
}

pub use cgroup::*;
pub use cli::*;
pub use daemon::*;
