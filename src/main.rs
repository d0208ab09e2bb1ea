use clap::Parser;

use mirrorpilot::cli::{Cli, Commands};
use mirrorpilot::commands::{self, FetchArgs, SetArgs};
use mirrorpilot::config::Config;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_dir = Config::default_dir()?;
    let config = Config::load_or_init(&config_dir)?;
    let _log_guard = mirrorpilot::logging::init(cli.verbose, &config_dir.join("logs"));
    tracing::debug!("mirrorpilot {} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Remotes {} => commands::handle_remotes(&config),
        Commands::Fetch { names, dest, source_root, json, no_input } => commands::handle_fetch(
            &config,
            &config_dir,
            FetchArgs { names, dest, source_root, json, no_input, verbose: cli.verbose },
        ),
        Commands::Run { operation, path, dest } => {
            commands::handle_run(&config, operation, path, dest)
        }
        Commands::Set {
            tool_path,
            download_dir,
            source_root,
            remote_filter,
            bandwidth_limit,
            max_job_retries,
            backoff_base_secs,
        } => commands::handle_set(
            &config,
            &config_dir,
            SetArgs {
                tool_path,
                download_dir,
                source_root,
                remote_filter,
                bandwidth_limit,
                max_job_retries,
                backoff_base_secs,
            },
        ),
    }
}
