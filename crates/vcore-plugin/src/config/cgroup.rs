use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use api_types::PodCgroupIdentity;
use clap::Args;
use clap::Parser;

use crate::cgroup::topology::DEFAULT_CGROUP_ROOT;
use crate::cgroup::topology::DEFAULT_LEGACY_CONTROLLER;
use crate::cgroup::topology::DEFAULT_MOUNTS_PATH;
use crate::cgroup::CgroupLocator;
use crate::cgroup::CgroupPathResolver;
use crate::cgroup::ContainerRuntime;
use crate::cgroup::ProcessEnumerator;
use crate::cgroup::TopologyDetector;

/// Where and how container cgroups are looked up.
#[derive(Args, Clone, Debug)]
pub struct CgroupArgs {
    #[arg(
        long,
        env = "VCORE_CGROUP_ROOT",
        default_value = DEFAULT_CGROUP_ROOT,
        value_hint = clap::ValueHint::DirPath,
        help = "Mount point of the cgroup hierarchy"
    )]
    pub cgroup_root: PathBuf,

    #[arg(
        long,
        env = "VCORE_MOUNTS_PATH",
        default_value = DEFAULT_MOUNTS_PATH,
        value_hint = clap::ValueHint::FilePath,
        help = "Mount table used to detect the cgroup version"
    )]
    pub mounts_path: PathBuf,

    #[arg(
        long,
        env = "VCORE_LEGACY_CONTROLLER",
        default_value = DEFAULT_LEGACY_CONTROLLER,
        help = "Controller directory used on cgroup v1 hosts"
    )]
    pub legacy_controller: String,

    #[arg(
        long,
        env = "VCORE_CONTAINER_RUNTIME",
        value_enum,
        default_value_t = ContainerRuntime::Docker,
        help = "Scope naming used for container IDs without a runtime scheme"
    )]
    pub runtime: ContainerRuntime,

    #[arg(
        long,
        default_value = "2000",
        help = "Timeout in milliseconds for reading cgroup and mount files"
    )]
    pub read_timeout_ms: u64,
}

impl CgroupArgs {
    /// Detects the hierarchy once and builds a locator on top of it.
    pub async fn build_locator(&self) -> CgroupLocator {
        let read_timeout = Duration::from_millis(self.read_timeout_ms);
        let layout = TopologyDetector::new(
            &self.mounts_path,
            &self.cgroup_root,
            self.legacy_controller.as_str(),
            read_timeout,
        )
        .layout()
        .await;
        CgroupLocator::new(
            layout,
            CgroupPathResolver::new(Arc::new(self.runtime)),
            ProcessEnumerator::new(read_timeout),
        )
    }
}

#[derive(Parser, Clone, Debug)]
pub struct ResolveCgroupArgs {
    #[arg(long, help = "Pod UID, e.g. 13bb153e-b6b5-4ff5-972d-2384da15832f")]
    pub pod_uid: String,

    #[arg(long, help = "Pod QoS class: Guaranteed, Burstable or BestEffort")]
    pub qos_class: String,

    #[arg(long, help = "Container ID from the pod status, e.g. docker://2ca438972fbd")]
    pub container_id: String,

    #[command(flatten)]
    pub cgroup: CgroupArgs,
}

impl ResolveCgroupArgs {
    pub fn identity(&self) -> PodCgroupIdentity {
        PodCgroupIdentity {
            pod_uid: self.pod_uid.clone(),
            qos_class: self.qos_class.clone(),
            container_runtime_id: self.container_id.clone(),
        }
    }
}
