use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;

use api_types::Device;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use super::api::AllocateRequest;
use super::api::AllocateResponse;
use super::api::ContainerAllocateResponse;
use super::api::DeviceSpec;
use super::api::Mount;

pub const LD_LIBRARY_PATH_ENV: &str = "LD_LIBRARY_PATH";
pub const VISIBLE_DEVICES_ENV: &str = "NVIDIA_VISIBLE_DEVICES";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("container request {index} asks for unknown device `{id}`")]
    UnknownDevice { index: usize, id: String },
}

/// What every allocated container receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AllocationConfig {
    /// Value of `LD_LIBRARY_PATH` inside the container
    pub ld_library_path: String,
    /// Host directory with the driver libraries
    pub library_host_path: String,
    /// Where the driver libraries are mounted in the container
    pub library_container_path: String,
    /// Device nodes granted to the container, same path on host and container
    pub device_nodes: Vec<String>,
    /// Cgroup permissions of the device nodes
    pub device_permissions: String,
    /// Annotation key marking an allocated container
    pub assign_annotation: String,
    /// `NVIDIA_VISIBLE_DEVICES` when no requested device maps to a physical GPU
    pub visible_devices_fallback: String,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            ld_library_path: "/usr/local/nvidia".to_string(),
            library_host_path: "/etc/unishare".to_string(),
            library_container_path: "/usr/local/nvidia".to_string(),
            device_nodes: vec!["/dev/nvidiactl".to_string(), "/dev/nvidia-uvm".to_string()],
            device_permissions: "rwm".to_string(),
            assign_annotation: "doslab.io/assign".to_string(),
            visible_devices_fallback: "void".to_string(),
        }
    }
}

impl AllocationConfig {
    /// Loads the allocation settings from a YAML file; missing keys keep defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        tracing::info!("Loading allocation configuration from {:?}", path);
        let yaml_content = tokio::fs::read_to_string(path).await?;
        let config: AllocationConfig = serde_yaml::from_str(&yaml_content)?;
        Ok(config)
    }

    /// Builds one container response per container request, in request order.
    ///
    /// The whole call fails if any container asks for a device that is not in
    /// `devices`; a partial answer would leave the kubelet with fewer
    /// responses than containers.
    pub fn allocate(
        &self,
        request: &AllocateRequest,
        devices: &[Device],
    ) -> Result<AllocateResponse, AllocationError> {
        let by_id: HashMap<&str, &Device> = devices.iter().map(|d| (d.id.as_str(), d)).collect();

        let container_responses = request
            .container_requests
            .iter()
            .enumerate()
            .map(|(index, container_req)| {
                let requested = container_req
                    .devices_ids
                    .iter()
                    .map(|id| {
                        by_id.get(id.as_str()).copied().ok_or_else(|| {
                            AllocationError::UnknownDevice {
                                index,
                                id: id.clone(),
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.container_response(&requested))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AllocateResponse {
            container_responses,
        })
    }

    fn container_response(&self, requested: &[&Device]) -> ContainerAllocateResponse {
        let mut envs = HashMap::new();
        envs.insert(
            LD_LIBRARY_PATH_ENV.to_string(),
            self.ld_library_path.clone(),
        );
        envs.insert(
            VISIBLE_DEVICES_ENV.to_string(),
            self.visible_devices(requested),
        );

        let mounts = vec![Mount {
            container_path: self.library_container_path.clone(),
            host_path: self.library_host_path.clone(),
            read_only: true,
        }];

        let devices = self
            .device_nodes
            .iter()
            .map(|node| DeviceSpec {
                container_path: node.clone(),
                host_path: node.clone(),
                permissions: self.device_permissions.clone(),
            })
            .collect();

        let mut annotations = HashMap::new();
        annotations.insert(self.assign_annotation.clone(), "true".to_string());

        ContainerAllocateResponse {
            envs,
            mounts,
            devices,
            annotations,
            cdi_devices: Vec::new(),
        }
    }

    /// Physical GPUs behind the requested devices, first-seen order, no repeats.
    fn visible_devices(&self, requested: &[&Device]) -> String {
        let mut seen = HashSet::new();
        let physical: Vec<&str> = requested
            .iter()
            .filter_map(|d| d.physical_id.as_deref())
            .filter(|id| seen.insert(*id))
            .collect();

        if physical.is_empty() {
            self.visible_devices_fallback.clone()
        } else {
            physical.join(",")
        }
    }
}
