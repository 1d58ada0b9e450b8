use std::collections::HashSet;

use api_types::Device;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("duplicate device ID `{0}`")]
    DuplicateDevice(String),

    #[error("unknown device ID `{0}`")]
    UnknownDevice(String),
}

/// Ordered catalog of the devices advertised for one resource name.
///
/// The snapshot lives in a watch channel: the health probe is the single
/// writer, advertise streams subscribe to it and are woken only when the
/// snapshot actually changes.
#[derive(Debug)]
pub struct DeviceInventory {
    resource_name: String,
    snapshot: watch::Sender<Vec<Device>>,
}

impl DeviceInventory {
    pub fn new(
        resource_name: impl Into<String>,
        devices: Vec<Device>,
    ) -> Result<Self, InventoryError> {
        check_unique(&devices)?;
        let (snapshot, _) = watch::channel(devices);
        Ok(Self {
            resource_name: resource_name.into(),
            snapshot,
        })
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// Current devices, in advertisement order.
    pub fn list(&self) -> Vec<Device> {
        self.snapshot.borrow().clone()
    }

    /// Updates one device's health. Returns whether anything changed.
    pub fn set_health(&self, id: &str, healthy: bool) -> Result<bool, InventoryError> {
        let mut found = false;
        let changed = self.snapshot.send_if_modified(|devices| {
            match devices.iter_mut().find(|d| d.id == id) {
                Some(device) => {
                    found = true;
                    let changed = device.healthy != healthy;
                    device.healthy = healthy;
                    changed
                }
                None => false,
            }
        });
        if !found {
            return Err(InventoryError::UnknownDevice(id.to_string()));
        }
        if changed {
            debug!(device = id, healthy, "device health changed");
        }
        Ok(changed)
    }

    /// Sets the health of every device. Returns whether anything changed.
    pub fn set_all_health(&self, healthy: bool) -> bool {
        self.snapshot.send_if_modified(|devices| {
            let mut changed = false;
            for device in devices.iter_mut().filter(|d| d.healthy != healthy) {
                device.healthy = healthy;
                changed = true;
            }
            changed
        })
    }

    /// Replaces the catalog with a freshly discovered device set.
    /// Returns whether anything changed.
    pub fn replace(&self, devices: Vec<Device>) -> Result<bool, InventoryError> {
        check_unique(&devices)?;
        Ok(self.snapshot.send_if_modified(|current| {
            if *current == devices {
                return false;
            }
            *current = devices;
            true
        }))
    }

    /// Receiver that is marked changed whenever the snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Device>> {
        self.snapshot.subscribe()
    }

    /// Number of live subscriptions, i.e. open advertise streams.
    pub fn subscriber_count(&self) -> usize {
        self.snapshot.receiver_count()
    }
}

fn check_unique(devices: &[Device]) -> Result<(), InventoryError> {
    let mut seen = HashSet::with_capacity(devices.len());
    for device in devices {
        if !seen.insert(device.id.as_str()) {
            return Err(InventoryError::DuplicateDevice(device.id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    fn inventory() -> DeviceInventory {
        DeviceInventory::new(
            "doslab.io/vcore",
            vec![Device::new("vcore-0"), Device::new("vcore-1")],
        )
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = DeviceInventory::new("r", vec![Device::new("a"), Device::new("a")]).unwrap_err();
        assert_eq!(err, InventoryError::DuplicateDevice("a".to_string()));
    }

    #[test]
    fn list_keeps_order() {
        let ids: Vec<_> = inventory().list().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["vcore-0", "vcore-1"]);
    }

    #[test]
    fn set_health_reports_changes() {
        let inventory = inventory();
        assert_eq!(inventory.set_health("vcore-1", false), Ok(true));
        assert_eq!(inventory.set_health("vcore-1", false), Ok(false));
        assert!(!inventory.list().iter().any(|d| d.id == "vcore-1" && d.healthy));
        assert_eq!(
            inventory.set_health("vcore-9", true),
            Err(InventoryError::UnknownDevice("vcore-9".to_string()))
        );
    }

    #[test(tokio::test)]
    async fn subscribers_see_only_real_changes() {
        let inventory = inventory();
        let mut rx = inventory.subscribe();
        rx.borrow_and_update();

        inventory.set_health("vcore-0", true).unwrap();
        assert!(!rx.has_changed().unwrap());

        inventory.set_health("vcore-0", false).unwrap();
        assert!(rx.has_changed().unwrap());
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update()[0].healthy);
    }

    #[test]
    fn replace_and_set_all() {
        let inventory = inventory();
        assert_eq!(inventory.replace(inventory.list()), Ok(false));
        assert_eq!(inventory.replace(vec![Device::new("x")]), Ok(true));
        assert_eq!(inventory.list(), vec![Device::new("x")]);

        assert!(inventory.set_all_health(false));
        assert!(!inventory.set_all_health(false));
        assert!(inventory.list().iter().all(|d| !d.healthy));
    }
}
