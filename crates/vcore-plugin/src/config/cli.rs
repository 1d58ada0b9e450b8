use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::cgroup::ResolveCgroupArgs;
use crate::config::daemon::DaemonArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the vcore device plugin daemon
    Daemon(Box<DaemonArgs>),
    /// Resolve a container's cgroup and list its processes
    #[command(name = "resolve-cgroup")]
    ResolveCgroup(ResolveCgroupArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_resolve_cgroup() {
        let cli = Cli::try_parse_from([
            "vcore-plugin",
            "resolve-cgroup",
            "--pod-uid",
            "13bb153e-b6b5-4ff5-972d-2384da15832f",
            "--qos-class",
            "BestEffort",
            "--container-id",
            "containerd://abc",
            "--runtime",
            "containerd",
        ])
        .unwrap();
        let Commands::ResolveCgroup(args) = cli.command else {
            panic!("expected resolve-cgroup");
        };
        assert_eq!(args.identity().container_runtime_id, "containerd://abc");
        assert_eq!(args.cgroup.runtime, crate::cgroup::ContainerRuntime::Containerd);
    }
}
