use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::DeviceDiscovery;
use super::DeviceInventory;

#[derive(Debug, Clone, Copy)]
pub struct HealthProbeConfig {
    /// Delay between probes while discovery succeeds
    pub interval: Duration,
    /// Consecutive failures after which all devices are marked unhealthy
    pub failure_threshold: u32,
    /// Upper bound of the retry delay after failures
    pub max_backoff: Duration,
}

impl Default for HealthProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            failure_threshold: 3,
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Periodically re-runs discovery and feeds the result into the inventory.
///
/// A failed probe means "unknown", not "unhealthy": the last known health is
/// kept until `failure_threshold` probes in a row have failed.
pub struct HealthProbe {
    discovery: Arc<dyn DeviceDiscovery>,
    inventory: Arc<DeviceInventory>,
    config: HealthProbeConfig,
    consecutive_failures: u32,
}

impl HealthProbe {
    pub fn new(
        discovery: Arc<dyn DeviceDiscovery>,
        inventory: Arc<DeviceInventory>,
        config: HealthProbeConfig,
    ) -> Self {
        Self {
            discovery,
            inventory,
            config,
            consecutive_failures: 0,
        }
    }

    #[tracing::instrument(skip_all, fields(resource = %self.inventory.resource_name()))]
    pub async fn run(mut self, cancellation_token: CancellationToken) {
        info!("Starting device health probe");
        let mut delay = self.config.interval;
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Device health probe shutdown requested");
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    delay = self.probe_once();
                }
            }
        }
    }

    /// Runs one probe and returns the delay before the next one.
    fn probe_once(&mut self) -> Duration {
        match self.discovery.discover() {
            Ok(devices) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "device discovery recovered after {} failure(s)",
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                match self.inventory.replace(devices) {
                    Ok(true) => info!("device inventory changed"),
                    Ok(false) => {}
                    Err(e) => error!("discovery returned an invalid device set: {e}"),
                }
                self.config.interval
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    "device discovery failed ({} in a row): {e}",
                    self.consecutive_failures
                );
                if self.consecutive_failures >= self.config.failure_threshold
                    && self.inventory.set_all_health(false)
                {
                    warn!(
                        "marked all devices unhealthy after {} failed probes",
                        self.consecutive_failures
                    );
                }
                backoff_delay(
                    self.config.interval,
                    self.consecutive_failures,
                    self.config.max_backoff,
                )
            }
        }
    }
}

/// `base * 2^failures`, capped at `max`.
pub(crate) fn backoff_delay(base: Duration, failures: u32, max: Duration) -> Duration {
    base.checked_mul(1u32.checked_shl(failures).unwrap_or(u32::MAX))
        .unwrap_or(max)
        .min(max)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use api_types::Device;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::device::DiscoveryError;

    struct ScriptedDiscovery {
        results: Mutex<VecDeque<Result<Vec<Device>, DiscoveryError>>>,
    }

    impl ScriptedDiscovery {
        fn new(results: Vec<Result<Vec<Device>, DiscoveryError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
            })
        }
    }

    impl DeviceDiscovery for ScriptedDiscovery {
        fn discover(&self) -> Result<Vec<Device>, DiscoveryError> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(DiscoveryError::Empty))
        }
    }

    fn config() -> HealthProbeConfig {
        HealthProbeConfig {
            interval: Duration::from_millis(10),
            failure_threshold: 2,
            max_backoff: Duration::from_millis(25),
        }
    }

    fn inventory() -> Arc<DeviceInventory> {
        Arc::new(DeviceInventory::new("r", vec![Device::new("a"), Device::new("b")]).unwrap())
    }

    #[test]
    fn failures_below_threshold_keep_health() {
        let inventory = inventory();
        let discovery = ScriptedDiscovery::new(vec![Err(DiscoveryError::Empty)]);
        let mut probe = HealthProbe::new(discovery, inventory.clone(), config());

        assert_eq!(probe.probe_once(), Duration::from_millis(20));
        assert!(inventory.list().iter().all(|d| d.healthy));
    }

    #[test]
    fn threshold_marks_devices_unhealthy_and_success_restores() {
        let inventory = inventory();
        let discovery = ScriptedDiscovery::new(vec![
            Err(DiscoveryError::Empty),
            Err(DiscoveryError::Empty),
            Ok(vec![Device::new("a"), Device::new("b")]),
        ]);
        let mut probe = HealthProbe::new(discovery, inventory.clone(), config());

        probe.probe_once();
        assert_eq!(probe.probe_once(), Duration::from_millis(25));
        assert!(inventory.list().iter().all(|d| !d.healthy));

        assert_eq!(probe.probe_once(), Duration::from_millis(10));
        assert!(inventory.list().iter().all(|d| d.healthy));
        assert_eq!(probe.consecutive_failures, 0);
    }

    #[test]
    fn discovery_can_change_the_device_set() {
        let inventory = inventory();
        let discovery = ScriptedDiscovery::new(vec![Ok(vec![Device::new("c")])]);
        let mut probe = HealthProbe::new(discovery, inventory.clone(), config());

        probe.probe_once();
        assert_eq!(inventory.list(), vec![Device::new("c")]);
    }

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(base, 0, max), base);
        assert_eq!(backoff_delay(base, 3, max), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, 10, max), max);
        assert_eq!(backoff_delay(base, 40, max), max);
    }

    #[test(tokio::test)]
    async fn run_stops_on_cancellation() {
        let probe = HealthProbe::new(ScriptedDiscovery::new(vec![]), inventory(), config());
        let token = CancellationToken::new();
        let handle = tokio::spawn(probe.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("probe should stop")
            .expect("probe task");
    }
}
