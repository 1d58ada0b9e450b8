use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use derive_more::Display;
use tokio::fs;
use tokio::time;
use tracing::debug;
use tracing::warn;

pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";
pub const DEFAULT_MOUNTS_PATH: &str = "/proc/self/mounts";
pub const DEFAULT_LEGACY_CONTROLLER: &str = "memory";

/// Which cgroup hierarchy the host has mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CgroupTopology {
    /// cgroup v1, one hierarchy per controller
    #[display("legacy")]
    Legacy,
    /// cgroup v2, single hierarchy
    #[display("unified")]
    Unified,
}

/// Detects the cgroup topology from the mount table.
#[derive(Debug, Clone)]
pub struct TopologyDetector {
    mounts_path: PathBuf,
    cgroup_root: PathBuf,
    legacy_controller: String,
    read_timeout: Duration,
}

impl TopologyDetector {
    pub fn new(
        mounts_path: impl Into<PathBuf>,
        cgroup_root: impl Into<PathBuf>,
        legacy_controller: impl Into<String>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            mounts_path: mounts_path.into(),
            cgroup_root: cgroup_root.into(),
            legacy_controller: legacy_controller.into(),
            read_timeout,
        }
    }

    /// Reads the mount table and classifies it.
    ///
    /// Never fails: an unreadable table is logged and reported as
    /// [`CgroupTopology::Unified`].
    pub async fn detect(&self) -> CgroupTopology {
        match time::timeout(self.read_timeout, fs::read_to_string(&self.mounts_path)).await {
            Ok(Ok(mounts)) => {
                let topology = self.classify(&mounts);
                debug!(mounts = %self.mounts_path.display(), %topology, "detected cgroup topology");
                topology
            }
            Ok(Err(e)) => {
                warn!(
                    "cannot read mount table {}: {e}, assuming unified cgroup hierarchy",
                    self.mounts_path.display()
                );
                CgroupTopology::Unified
            }
            Err(_) => {
                warn!(
                    "reading mount table {} timed out after {:?}, assuming unified cgroup hierarchy",
                    self.mounts_path.display(),
                    self.read_timeout
                );
                CgroupTopology::Unified
            }
        }
    }

    /// A v1 mount of the legacy controller under the cgroup root means legacy.
    fn classify(&self, mounts: &str) -> CgroupTopology {
        let controller_mount = self.cgroup_root.join(&self.legacy_controller);

        let legacy = mounts.lines().any(|line| {
            let mut fields = line.split_whitespace();
            let (Some(_source), Some(mount_point), Some(fs_type)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return false;
            };
            fs_type == "cgroup" && Path::new(mount_point) == controller_mount
        });

        if legacy {
            CgroupTopology::Legacy
        } else {
            CgroupTopology::Unified
        }
    }

    /// Detects the topology and returns the matching layout.
    pub async fn layout(&self) -> CgroupLayout {
        CgroupLayout {
            root: self.cgroup_root.clone(),
            topology: self.detect().await,
            legacy_controller: self.legacy_controller.clone(),
        }
    }
}

/// Where relative cgroup paths live on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupLayout {
    pub root: PathBuf,
    pub topology: CgroupTopology,
    pub legacy_controller: String,
}

impl CgroupLayout {
    /// Absolute directory of a cgroup given its path relative to the hierarchy.
    pub fn cgroup_dir(&self, relative: &Path) -> PathBuf {
        match self.topology {
            CgroupTopology::Unified => self.root.join(relative),
            CgroupTopology::Legacy => self.root.join(&self.legacy_controller).join(relative),
        }
    }
}
