use std::path::PathBuf;

use api_types::PodCgroupIdentity;

use super::procs::PROCS_FILE;
use super::CgroupLayout;
use super::CgroupPathResolver;
use super::ProcessEnumerator;
use super::Result;

/// A container cgroup found on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedCgroup {
    /// Absolute cgroup directory
    pub dir: PathBuf,
    /// Processes inside the cgroup at lookup time
    pub pids: Vec<u32>,
}

/// Finds the cgroup directory and processes of a container.
#[derive(Debug, Clone)]
pub struct CgroupLocator {
    layout: CgroupLayout,
    resolver: CgroupPathResolver,
    enumerator: ProcessEnumerator,
}

impl CgroupLocator {
    pub fn new(
        layout: CgroupLayout,
        resolver: CgroupPathResolver,
        enumerator: ProcessEnumerator,
    ) -> Self {
        Self {
            layout,
            resolver,
            enumerator,
        }
    }

    pub fn layout(&self) -> &CgroupLayout {
        &self.layout
    }

    /// Absolute cgroup directory of the container, without touching the filesystem.
    pub fn cgroup_dir(&self, identity: &PodCgroupIdentity) -> Result<PathBuf> {
        let relative = self.resolver.resolve(identity)?;
        Ok(self.layout.cgroup_dir(&relative))
    }

    /// Resolves the container cgroup and lists its processes.
    ///
    /// Only identity errors are reported; an absent cgroup yields no PIDs.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn locate(&self, identity: &PodCgroupIdentity) -> Result<LocatedCgroup> {
        let dir = self.cgroup_dir(identity)?;
        let pids = self.enumerator.list_processes(&dir.join(PROCS_FILE)).await;
        Ok(LocatedCgroup { dir, pids })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::cgroup::CgroupError;
    use crate::cgroup::CgroupTopology;

    fn identity() -> PodCgroupIdentity {
        PodCgroupIdentity {
            pod_uid: "13bb153e-b6b5-4ff5-972d-2384da15832f".to_string(),
            qos_class: "Burstable".to_string(),
            container_runtime_id: "docker://2ca438972fbd".to_string(),
        }
    }

    fn locator(root: PathBuf, topology: CgroupTopology) -> CgroupLocator {
        CgroupLocator::new(
            CgroupLayout {
                root,
                topology,
                legacy_controller: "memory".to_string(),
            },
            CgroupPathResolver::default(),
            ProcessEnumerator::new(Duration::from_secs(1)),
        )
    }

    #[test(tokio::test)]
    async fn locates_processes_under_unified_root() {
        let root = tempfile::tempdir().expect("tempdir");
        let locator = locator(root.path().to_path_buf(), CgroupTopology::Unified);

        let dir = locator.cgroup_dir(&identity()).unwrap();
        std::fs::create_dir_all(&dir).expect("create cgroup dir");
        std::fs::write(dir.join(PROCS_FILE), "100\n200\n").expect("write procs");

        let located = locator.locate(&identity()).await.unwrap();
        assert_eq!(
            located,
            LocatedCgroup {
                dir,
                pids: vec![100, 200]
            }
        );
    }

    #[test(tokio::test)]
    async fn legacy_layout_uses_controller_hierarchy() {
        let root = tempfile::tempdir().expect("tempdir");
        let locator = locator(root.path().to_path_buf(), CgroupTopology::Legacy);

        let dir = locator.cgroup_dir(&identity()).unwrap();
        assert!(dir.starts_with(root.path().join("memory").join("kubepods.slice")));

        let located = locator.locate(&identity()).await.unwrap();
        assert!(located.pids.is_empty());
    }

    #[test(tokio::test)]
    async fn identity_errors_propagate() {
        let root = tempfile::tempdir().expect("tempdir");
        let locator = locator(root.path().to_path_buf(), CgroupTopology::Unified);
        let mut bad = identity();
        bad.qos_class = "Gold".to_string();

        assert_eq!(
            locator.locate(&bad).await.unwrap_err(),
            CgroupError::UnknownQosClass("Gold".to_string())
        );
    }
}
