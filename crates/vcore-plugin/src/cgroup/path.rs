use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use api_types::PodCgroupIdentity;
use api_types::QosClass;

use super::CgroupError;
use super::Result;

/// Root slice of every pod managed by the kubelet systemd cgroup driver.
const KUBEPODS_SLICE: &str = "kubepods.slice";

/// Builds the terminal scope segment of a container cgroup.
pub trait ScopeNaming: Send + Sync + Debug {
    fn build_scope_segment(&self, container_id: &str) -> String;
}

/// Container runtimes with known scope naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ContainerRuntime {
    /// `docker-<id>.scope`
    #[default]
    Docker,
    /// `cri-containerd-<id>.scope`
    Containerd,
    /// `crio-<id>.scope`
    CriO,
}

impl ScopeNaming for ContainerRuntime {
    fn build_scope_segment(&self, container_id: &str) -> String {
        match self {
            ContainerRuntime::Docker => format!("docker-{container_id}.scope"),
            ContainerRuntime::Containerd => format!("cri-containerd-{container_id}.scope"),
            ContainerRuntime::CriO => format!("crio-{container_id}.scope"),
        }
    }
}

impl ContainerRuntime {
    /// Splits a pod status container ID such as `containerd://abc` into the
    /// runtime and the bare ID. IDs without a scheme have no runtime.
    pub fn split_container_id(raw: &str) -> Result<(Option<Self>, &str)> {
        let Some((scheme, id)) = raw.split_once("://") else {
            return Ok((None, raw));
        };
        let runtime = match scheme {
            "docker" => ContainerRuntime::Docker,
            "containerd" => ContainerRuntime::Containerd,
            "cri-o" | "crio" => ContainerRuntime::CriO,
            other => {
                return Err(CgroupError::InvalidIdentity(format!(
                    "unsupported container runtime `{other}`"
                )))
            }
        };
        Ok((Some(runtime), id))
    }
}

/// Derives container cgroup paths relative to the cgroup hierarchy root.
///
/// Paths are recomputed on every call; runtime IDs can be reused once a
/// container is gone, so a cached path could silently point at another
/// container.
#[derive(Debug, Clone)]
pub struct CgroupPathResolver {
    default_naming: Arc<dyn ScopeNaming>,
}

impl Default for CgroupPathResolver {
    fn default() -> Self {
        Self::new(Arc::new(ContainerRuntime::Docker))
    }
}

impl CgroupPathResolver {
    /// `default_naming` is used for container IDs that carry no runtime scheme.
    pub fn new(default_naming: Arc<dyn ScopeNaming>) -> Self {
        Self { default_naming }
    }

    /// Resolves e.g.
    /// `kubepods.slice/kubepods-besteffort.slice/kubepods-besteffort-pod<uid>.slice/docker-<id>.scope`.
    ///
    /// # Errors
    ///
    /// - [`CgroupError::InvalidIdentity`] if the pod UID, QoS class or
    ///   container ID is empty
    /// - [`CgroupError::UnknownQosClass`] if the QoS class is not a Kubernetes one
    pub fn resolve(&self, identity: &PodCgroupIdentity) -> Result<PathBuf> {
        if identity.pod_uid.is_empty() {
            return Err(CgroupError::InvalidIdentity("pod UID is empty".to_string()));
        }
        if !identity
            .pod_uid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CgroupError::InvalidIdentity(format!(
                "pod UID `{}` is not a valid slice name",
                identity.pod_uid
            )));
        }
        if identity.qos_class.is_empty() {
            return Err(CgroupError::InvalidIdentity("QoS class is empty".to_string()));
        }
        let qos: QosClass = identity
            .qos_class
            .parse()
            .map_err(|_| CgroupError::UnknownQosClass(identity.qos_class.clone()))?;

        let (runtime, container_id) =
            ContainerRuntime::split_container_id(&identity.container_runtime_id)?;
        if container_id.is_empty() {
            return Err(CgroupError::InvalidIdentity(
                "container runtime ID is empty".to_string(),
            ));
        }
        // runtime IDs are hex digests; anything else could leave the pod slice
        if !container_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CgroupError::InvalidIdentity(format!(
                "container runtime ID `{container_id}` is not alphanumeric"
            )));
        }
        let scope = match &runtime {
            Some(runtime) => runtime.build_scope_segment(container_id),
            None => self.default_naming.build_scope_segment(container_id),
        };

        let mut path = pod_slice_path(&identity.pod_uid, qos);
        path.push(scope);
        Ok(path)
    }
}

/// Pod level slice path, without the container scope.
pub fn pod_slice_path(pod_uid: &str, qos: QosClass) -> PathBuf {
    let qos_name = qos.slice_name();
    let pod_slice = format!("kubepods-{qos_name}-pod{}.slice", pod_uid.replace('-', "_"));

    let mut path = PathBuf::from(KUBEPODS_SLICE);
    path.push(format!("kubepods-{qos_name}.slice"));
    path.push(pod_slice);
    path
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use similar_asserts::assert_eq;

    use super::*;

    fn identity(uid: &str, qos: &str, id: &str) -> PodCgroupIdentity {
        PodCgroupIdentity {
            pod_uid: uid.to_string(),
            qos_class: qos.to_string(),
            container_runtime_id: id.to_string(),
        }
    }

    #[test]
    fn resolves_besteffort_docker_container() {
        let resolver = CgroupPathResolver::default();
        let path = resolver
            .resolve(&identity(
                "13bb153e-b6b5-4ff5-972d-2384da15832f",
                "BestEffort",
                "2ca438972fbd",
            ))
            .unwrap();
        assert_eq!(
            path,
            Path::new(
                "kubepods.slice/kubepods-besteffort.slice/kubepods-besteffort-pod13bb153e_b6b5_4ff5_972d_2384da15832f.slice/docker-2ca438972fbd.scope"
            )
        );
    }

    #[test]
    fn every_qos_class_gets_its_own_slice() {
        let resolver = CgroupPathResolver::default();
        for (qos, name) in [
            ("Guaranteed", "guaranteed"),
            ("Burstable", "burstable"),
            ("BestEffort", "besteffort"),
        ] {
            for uid in ["a-b-c", "plain", "1-2"] {
                let path = resolver.resolve(&identity(uid, qos, "cid")).unwrap();
                let expected = format!(
                    "kubepods.slice/kubepods-{name}.slice/kubepods-{name}-pod{}.slice/docker-cid.scope",
                    uid.replace('-', "_")
                );
                assert_eq!(path, PathBuf::from(expected));
            }
        }
    }

    #[test]
    fn empty_fields_are_invalid_identity() {
        let resolver = CgroupPathResolver::default();
        for id in [
            identity("", "Burstable", "cid"),
            identity("uid", "", "cid"),
            identity("", "", "cid"),
            identity("uid", "Burstable", ""),
            identity("uid", "Burstable", "docker://"),
        ] {
            assert!(
                matches!(resolver.resolve(&id), Err(CgroupError::InvalidIdentity(_))),
                "{id:?}"
            );
        }
    }

    #[test]
    fn path_separators_in_ids_are_invalid_identity() {
        let resolver = CgroupPathResolver::default();
        for id in [
            identity("u", "BestEffort", "docker://x/../../../../etc"),
            identity("u", "BestEffort", "../escape"),
            identity("u", "BestEffort", "abc.scope"),
            identity("u/../..", "BestEffort", "cid"),
            identity("..", "BestEffort", "cid"),
        ] {
            assert!(
                matches!(resolver.resolve(&id), Err(CgroupError::InvalidIdentity(_))),
                "{id:?}"
            );
        }
    }

    #[test]
    fn unknown_qos_class_is_rejected() {
        let resolver = CgroupPathResolver::default();
        let err = resolver
            .resolve(&identity("uid", "Premium", "cid"))
            .unwrap_err();
        assert_eq!(err, CgroupError::UnknownQosClass("Premium".to_string()));
    }

    #[test]
    fn runtime_scheme_selects_scope_naming() {
        let resolver = CgroupPathResolver::default();
        let path = resolver
            .resolve(&identity("uid", "Guaranteed", "containerd://abc"))
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "cri-containerd-abc.scope");

        let path = resolver
            .resolve(&identity("uid", "Guaranteed", "cri-o://abc"))
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "crio-abc.scope");

        let path = resolver
            .resolve(&identity("uid", "Guaranteed", "docker://abc"))
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "docker-abc.scope");
    }

    #[test]
    fn default_naming_applies_to_bare_ids() {
        let resolver = CgroupPathResolver::new(Arc::new(ContainerRuntime::Containerd));
        let path = resolver
            .resolve(&identity("uid", "Burstable", "abc"))
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "cri-containerd-abc.scope");
    }

    #[test]
    fn unsupported_runtime_scheme() {
        let resolver = CgroupPathResolver::default();
        let err = resolver
            .resolve(&identity("uid", "Burstable", "rkt://abc"))
            .unwrap_err();
        assert!(matches!(err, CgroupError::InvalidIdentity(_)));
    }
}
