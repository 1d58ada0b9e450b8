//! Cgroup location for pod containers.
//!
//! The kubelet's systemd cgroup driver places every container under a fixed
//! slice hierarchy. This module rebuilds that hierarchy from pod identity,
//! figures out where the hierarchy is mounted and reads the processes that
//! currently live in a container's cgroup.
//!
//! - [`TopologyDetector`]: legacy (v1) vs unified (v2) hierarchy detection
//! - [`CgroupPathResolver`]: pod identity to relative cgroup path
//! - [`ProcessEnumerator`]: `cgroup.procs` reader
//! - [`CgroupLocator`]: the three combined

pub mod locator;
pub mod path;
pub mod procs;
pub mod topology;

pub use locator::CgroupLocator;
pub use path::CgroupPathResolver;
pub use path::ContainerRuntime;
pub use path::ScopeNaming;
pub use procs::ProcessEnumerator;
pub use topology::CgroupLayout;
pub use topology::CgroupTopology;
pub use topology::TopologyDetector;

use thiserror::Error;

/// Errors returned while resolving a container's cgroup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CgroupError {
    #[error("invalid pod identity: {0}")]
    InvalidIdentity(String),

    #[error("unknown QoS class `{0}`")]
    UnknownQosClass(String),
}

pub type Result<T> = std::result::Result<T, CgroupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CgroupError::UnknownQosClass("Premium".to_string());
        assert_eq!(err.to_string(), "unknown QoS class `Premium`");

        let err = CgroupError::InvalidIdentity("pod UID is empty".to_string());
        assert_eq!(err.to_string(), "invalid pod identity: pod UID is empty");
    }
}
