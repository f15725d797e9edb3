use std::ffi::OsString;

use clap::{ArgMatches, CommandFactory, FromArgMatches};

use crate::args::{Cli, Command, LoadArgs, ServeArgs};
use crate::config::{apply_config, load_config};
use crate::error::AppResult;
use crate::load::{print_summary, run_load};
use crate::server::{Server, ServerSettings};
use crate::shutdown_handlers::{setup_signal_shutdown_handler, shutdown_channel};
use crate::system::logger::{init_logging, install_panic_logger};

enum RunPlan {
    Serve(ServeArgs),
    Load(LoadArgs),
}

pub(crate) fn run() -> AppResult<()> {
    let (cli, matches) = parse_args(std::env::args_os())?;

    init_logging(cli.verbose, cli.no_color);
    install_panic_logger();

    let plan = build_plan(cli, &matches)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(execute_plan(plan))
}

fn parse_args<I>(raw_args: I) -> AppResult<(Cli, ArgMatches)>
where
    I: IntoIterator<Item = OsString>,
{
    let matches = Cli::command().get_matches_from(raw_args);
    let cli = Cli::from_arg_matches(&matches)?;
    Ok((cli, matches))
}

fn build_plan(mut cli: Cli, matches: &ArgMatches) -> AppResult<RunPlan> {
    if let Some(config) = load_config(cli.config.as_deref())? {
        apply_config(&mut cli, matches, &config)?;
    }

    match cli.command {
        Command::Serve(args) => Ok(RunPlan::Serve(args)),
        Command::Load(args) => {
            args.validate()?;
            Ok(RunPlan::Load(args))
        }
    }
}

async fn execute_plan(plan: RunPlan) -> AppResult<()> {
    let (shutdown_tx, _) = shutdown_channel();
    let signal_handle = setup_signal_shutdown_handler(&shutdown_tx);

    let result = match plan {
        RunPlan::Serve(args) => run_server(&args, &shutdown_tx).await,
        RunPlan::Load(args) => {
            let summary = run_load(&args, &shutdown_tx).await?;
            print_summary(&summary);
            Ok(())
        }
    };

    drop(shutdown_tx.send(()));
    if let Err(err) = signal_handle.await {
        tracing::debug!("Signal handler task ended abnormally: {}", err);
    }
    result
}

async fn run_server(args: &ServeArgs, shutdown_tx: &crate::shutdown::ShutdownSender) -> AppResult<()> {
    let server = Server::bind(&args.listen_addr(), ServerSettings::from(args)).await?;
    let addr = server.local_addr()?;
    tracing::info!("Server is running on {}", addr);
    tracing::info!("Metrics available at /metrics");
    tracing::info!("WebSocket server ready for connections");
    server.run(shutdown_tx.subscribe()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn os_args(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn serve_plan_from_cli() -> AppResult<()> {
        let (cli, matches) = parse_args(os_args(&[
            "telecast",
            "--config",
            "missing-on-purpose.toml",
            "serve",
            "--port",
            "9001",
        ]))?;
        if cli.config.as_deref() != Some("missing-on-purpose.toml") {
            return Err(AppError::validation("Global --config not parsed"));
        }
        let Command::Serve(args) = &cli.command else {
            return Err(AppError::validation("Expected serve command"));
        };
        if args.port != 9001 {
            return Err(AppError::validation("Port override not applied"));
        }
        if build_plan(cli.clone(), &matches).is_ok() {
            return Err(AppError::validation("Missing config file should fail"));
        }
        Ok(())
    }

    #[test]
    fn load_plan_rejects_inverted_backoff() -> AppResult<()> {
        let (mut cli, matches) = parse_args(os_args(&[
            "telecast",
            "load",
            "--close-backoff",
            "5s",
            "--error-backoff",
            "1s",
        ]))?;
        cli.config = None;
        match build_plan(cli, &matches) {
            Err(AppError::Validation(_)) => Ok(()),
            Err(other) => Err(other),
            Ok(_) => Err(AppError::validation("Inverted backoff accepted")),
        }
    }
}
