//! Virtual device catalog and hardware discovery.

pub mod discovery;
pub mod health;
pub mod inventory;

pub use discovery::DeviceDiscovery;
pub use discovery::DiscoveryError;
pub use discovery::NvmlDiscovery;
pub use discovery::StaticDiscovery;
pub use health::HealthProbe;
pub use health::HealthProbeConfig;
pub use inventory::DeviceInventory;
pub use inventory::InventoryError;
