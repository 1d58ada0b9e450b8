use std::path::PathBuf;

use clap::Parser;
use clap::ValueEnum;

use crate::config::cgroup::CgroupArgs;
use crate::plugin::DEFAULT_PLUGIN_DIR;

/// Where the advertised devices come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DiscoveryMode {
    /// Slice every GPU reported by NVML
    Nvml,
    /// Advertise a fixed number of devices, no GPU needed
    Static,
}

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "VCORE_RESOURCE_NAME",
        default_value = "doslab.io/vcore",
        help = "Extended resource name advertised to the kubelet"
    )]
    pub resource_name: String,

    #[arg(
        long,
        env = "VCORE_SOCKET_NAME",
        default_value = "vcore.sock",
        help = "Socket file name of the plugin inside the plugin directory"
    )]
    pub socket_name: String,

    #[arg(
        long,
        env = "VCORE_PLUGIN_DIR",
        default_value = DEFAULT_PLUGIN_DIR,
        value_hint = clap::ValueHint::DirPath,
        help = "Kubelet device plugin directory"
    )]
    pub plugin_dir: PathBuf,

    #[arg(
        long,
        env = "VCORE_DISCOVERY",
        value_enum,
        default_value_t = DiscoveryMode::Nvml,
        help = "Device discovery backend"
    )]
    pub discovery: DiscoveryMode,

    #[arg(
        long,
        env = "VCORE_PER_GPU",
        default_value = "100",
        help = "Number of vcore devices advertised for each physical GPU"
    )]
    pub vcores_per_gpu: u32,

    #[arg(
        long,
        env = "VCORE_STATIC_COUNT",
        default_value = "100",
        help = "Number of devices advertised in static discovery mode"
    )]
    pub static_device_count: u32,

    #[arg(
        long,
        default_value = "10",
        help = "Seconds between device health probes"
    )]
    pub health_interval_secs: u64,

    #[arg(
        long,
        default_value = "3",
        help = "Failed probes in a row before all devices are reported unhealthy"
    )]
    pub health_failure_threshold: u32,

    #[arg(
        long,
        default_value = "60",
        help = "Upper bound in seconds of the probe retry delay"
    )]
    pub health_max_backoff_secs: u64,

    #[command(flatten)]
    pub cgroup: CgroupArgs,

    #[arg(
        long,
        env = "VCORE_ALLOCATION_CONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML file overriding the environment, mounts and devices given to allocated containers"
    )]
    pub allocation_config: Option<PathBuf>,

    #[arg(
        long,
        help = "Publish node capacity and watch pods on this node",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enable_k8s: bool,

    #[arg(
        long,
        env = "NODE_NAME",
        help = "Node name for filtering pods to this node only"
    )]
    pub node_name: Option<String>,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        help = "Write the advertised device count into the node capacity",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub patch_node_capacity: bool,

    #[arg(
        long,
        default_value = "5000",
        help = "Timeout in milliseconds of one kubelet registration attempt"
    )]
    pub registration_timeout_ms: u64,

    #[arg(
        long,
        default_value = "1000",
        help = "Initial delay in milliseconds between registration attempts"
    )]
    pub registration_backoff_initial_ms: u64,

    #[arg(
        long,
        default_value = "30000",
        help = "Maximum delay in milliseconds between registration attempts"
    )]
    pub registration_backoff_max_ms: u64,

    #[arg(
        long,
        default_value = "8",
        help = "Registration attempts before giving up"
    )]
    pub registration_max_attempts: u32,

    #[arg(
        long,
        default_value = "5",
        help = "Seconds between checks that the plugin socket still exists"
    )]
    pub socket_check_interval_secs: u64,

    #[arg(
        long,
        env = utils::logging::LOG_PATH_ENV_VAR,
        value_hint = clap::ValueHint::DirPath,
        help = "Directory for daily rotated log files, stderr only when unset"
    )]
    pub log_dir: Option<PathBuf>,
}
