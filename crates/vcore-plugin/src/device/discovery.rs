use api_types::Device;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use thiserror::Error;
use tracing::info;
use tracing::warn;

use crate::arch::arch_family;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("NVML call failed: {0}")]
    Nvml(#[from] NvmlError),

    #[error("no devices discovered")]
    Empty,
}

/// Source of the devices to advertise.
pub trait DeviceDiscovery: Send + Sync {
    /// Returns the live device set with current health.
    fn discover(&self) -> Result<Vec<Device>, DiscoveryError>;
}

/// Advertises a fixed number of synthetic devices named `<resource>-<n>`.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    resource_name: String,
    count: u32,
}

impl StaticDiscovery {
    pub fn new(resource_name: impl Into<String>, count: u32) -> Self {
        Self {
            resource_name: resource_name.into(),
            count,
        }
    }
}

impl DeviceDiscovery for StaticDiscovery {
    fn discover(&self) -> Result<Vec<Device>, DiscoveryError> {
        if self.count == 0 {
            return Err(DiscoveryError::Empty);
        }
        Ok((0..self.count)
            .map(|i| Device::new(format!("{}-{i}", self.resource_name)))
            .collect())
    }
}

/// Splits every NVIDIA GPU found through NVML into virtual core devices.
pub struct NvmlDiscovery {
    nvml: Nvml,
    vcores_per_gpu: u32,
}

impl NvmlDiscovery {
    /// Initializes NVML and logs the GPUs it sees.
    pub fn init(vcores_per_gpu: u32) -> Result<Self, DiscoveryError> {
        let nvml = init_nvml()?;
        let device_count = nvml.device_count()?;
        info!("Discovered {} GPU device(s)", device_count);

        for i in 0..device_count {
            let device = nvml.device_by_index(i)?;
            let uuid = device.uuid()?;
            let name = device.name()?;
            let family = match device.cuda_compute_capability() {
                Ok(cc) => arch_family(cc.major, cc.minor),
                Err(e) => {
                    warn!("failed to read compute capability of GPU {i}: {e}");
                    crate::arch::UNKNOWN_FAMILY
                }
            };
            info!("Found GPU {}: {} ({}, {} architecture)", i, uuid, name, family);
        }

        Ok(Self {
            nvml,
            vcores_per_gpu,
        })
    }
}

fn init_nvml() -> Result<Nvml, NvmlError> {
    match Nvml::init() {
        Ok(nvml) => {
            info!("NVML initialized successfully");
            Ok(nvml)
        }
        Err(_) => {
            warn!("Standard NVML init failed, trying with explicit library path");
            let nvml = Nvml::builder()
                .lib_path(std::ffi::OsStr::new("libnvidia-ml.so.1"))
                .init()?;
            info!("NVML initialized with explicit library path");
            Ok(nvml)
        }
    }
}

impl DeviceDiscovery for NvmlDiscovery {
    fn discover(&self) -> Result<Vec<Device>, DiscoveryError> {
        let device_count = self.nvml.device_count()?;
        let mut devices = Vec::with_capacity((device_count * self.vcores_per_gpu) as usize);

        for i in 0..device_count {
            let gpu = self.nvml.device_by_index(i)?;
            let uuid = gpu.uuid()?;
            // a GPU that stops answering memory queries has fallen off the bus
            let healthy = match gpu.memory_info() {
                Ok(_) => true,
                Err(e) => {
                    warn!("GPU {uuid} failed health query: {e}");
                    false
                }
            };
            devices.extend((0..self.vcores_per_gpu).map(|n| Device {
                id: format!("{uuid}-{n}"),
                healthy,
                physical_id: Some(uuid.clone()),
            }));
        }

        if devices.is_empty() {
            return Err(DiscoveryError::Empty);
        }
        Ok(devices)
    }
}
