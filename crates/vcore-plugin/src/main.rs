use anyhow::Result;
use clap::Parser;
use utils::logging;
use utils::version;
use vcore_plugin::app::ApplicationBuilder;
use vcore_plugin::config::Cli;
use vcore_plugin::config::Commands;
use vcore_plugin::config::DaemonArgs;
use vcore_plugin::config::ResolveCgroupArgs;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::ResolveCgroup(args) => run_resolve_cgroup(args).await,
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let _guard = logging::init(daemon_args.log_dir.as_deref());

    tracing::info!("Starting vcore device plugin {}", &**version::VERSION);

    let app = ApplicationBuilder::new(daemon_args).build().await?;

    let result = app.run().await;
    app.shutdown().await?;

    result
}

async fn run_resolve_cgroup(args: ResolveCgroupArgs) -> Result<()> {
    let _guard = logging::init(None::<&std::path::Path>);

    let locator = args.cgroup.build_locator().await;
    let located = locator.locate(&args.identity()).await?;

    let report = serde_json::json!({
        "topology": locator.layout().topology.to_string(),
        "cgroupPath": located.dir,
        "pids": located.pids,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
