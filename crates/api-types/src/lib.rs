//! Shared API type definitions
//!
//! This crate contains the plain data types exchanged between the vcore device
//! plugin components: advertised devices, pod cgroup identities and the
//! container cgroup records handed to enforcement.

use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// Kubernetes pod Quality-of-Service class.
#[derive(Debug, Clone, PartialEq, Eq, Copy, Hash, Serialize, Deserialize)]
pub enum QosClass {
    Guaranteed,
    Burstable,
    BestEffort,
}

impl QosClass {
    /// Lower-case form used in systemd slice names, e.g. `besteffort`.
    pub fn slice_name(self) -> &'static str {
        match self {
            QosClass::Guaranteed => "guaranteed",
            QosClass::Burstable => "burstable",
            QosClass::BestEffort => "besteffort",
        }
    }
}

impl std::fmt::Display for QosClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Returned when a QoS class string is not one of the Kubernetes spellings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownQosClass(pub String);

impl std::fmt::Display for UnknownQosClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown QoS class `{}`", self.0)
    }
}

impl std::error::Error for UnknownQosClass {}

impl FromStr for QosClass {
    type Err = UnknownQosClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Guaranteed" => Ok(QosClass::Guaranteed),
            "Burstable" => Ok(QosClass::Burstable),
            "BestEffort" => Ok(QosClass::BestEffort),
            other => Err(UnknownQosClass(other.to_string())),
        }
    }
}

/// Identity of a container as needed to derive its cgroup path.
///
/// `qos_class` keeps the raw string from the pod status; it is validated when
/// the path is resolved. `container_runtime_id` may carry a runtime scheme such
/// as `containerd://`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodCgroupIdentity {
    pub pod_uid: String,
    pub qos_class: String,
    pub container_runtime_id: String,
}

/// A virtual device advertised to the kubelet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Device ID, unique within one resource
    pub id: String,
    /// Health as last observed by the probe
    pub healthy: bool,
    /// UUID of the physical GPU backing this device, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_id: Option<String>,
}

impl Device {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            healthy: true,
            physical_id: None,
        }
    }

    pub fn with_physical_id(mut self, physical_id: impl Into<String>) -> Self {
        self.physical_id = Some(physical_id.into());
        self
    }
}

/// A located container cgroup, published for enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerCgroup {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
    /// Absolute cgroup directory of the container
    pub cgroup_path: PathBuf,
    /// Processes currently inside the cgroup
    pub pids: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_class_parses_kubernetes_spelling() {
        assert_eq!("BestEffort".parse::<QosClass>(), Ok(QosClass::BestEffort));
        assert_eq!("Guaranteed".parse::<QosClass>(), Ok(QosClass::Guaranteed));
        assert_eq!("Burstable".parse::<QosClass>(), Ok(QosClass::Burstable));
        assert_eq!(
            "besteffort".parse::<QosClass>(),
            Err(UnknownQosClass("besteffort".to_string()))
        );
    }

    #[test]
    fn identity_uses_camel_case() {
        let identity = PodCgroupIdentity {
            pod_uid: "uid".to_string(),
            qos_class: "Burstable".to_string(),
            container_runtime_id: "abc".to_string(),
        };
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["podUid"], "uid");
        assert_eq!(json["containerRuntimeId"], "abc");
    }

    #[test]
    fn device_omits_missing_physical_id() {
        let json = serde_json::to_string(&Device::new("d-0")).unwrap();
        assert_eq!(json, r#"{"id":"d-0","healthy":true}"#);
    }
}
