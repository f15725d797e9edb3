use std::time::Duration;

use clap::ArgMatches;
use clap::parser::ValueSource;

use crate::args::{Cli, Command, LoadArgs, PositiveU64, PositiveUsize, ServeArgs, parse_ws_url};
use crate::error::{AppError, AppResult, ConfigError};

use super::types::{ConfigFile, DurationValue, LoadConfig, ServerConfig};

/// Overlays config-file values onto parsed CLI arguments.
///
/// Values given on the command line or through the environment win over the file.
///
/// # Errors
///
/// Returns an error when a config value is out of range or malformed.
pub fn apply_config(cli: &mut Cli, matches: &ArgMatches, config: &ConfigFile) -> AppResult<()> {
    let Some((_, sub_matches)) = matches.subcommand() else {
        return Ok(());
    };
    match &mut cli.command {
        Command::Serve(args) => apply_server(args, sub_matches, &config.server),
        Command::Load(args) => apply_load(args, sub_matches, &config.load),
    }
}

fn apply_server(args: &mut ServeArgs, matches: &ArgMatches, config: &ServerConfig) -> AppResult<()> {
    if !is_explicit(matches, "host")
        && let Some(host) = config.host.clone()
    {
        args.host = host;
    }
    if !is_explicit(matches, "port")
        && let Some(port) = config.port
    {
        args.port = port;
    }
    apply_duration(
        matches,
        "push_interval",
        config.push_interval.as_ref(),
        &mut args.push_interval,
    )?;
    apply_duration(
        matches,
        "sweep_interval",
        config.sweep_interval.as_ref(),
        &mut args.sweep_interval,
    )?;
    apply_duration(
        matches,
        "idle_timeout",
        config.idle_timeout.as_ref(),
        &mut args.idle_timeout,
    )?;
    apply_duration(
        matches,
        "create_delay",
        config.create_delay.as_ref(),
        &mut args.create_delay,
    )?;
    apply_duration(
        matches,
        "operation_delay",
        config.operation_delay.as_ref(),
        &mut args.operation_delay,
    )?;
    if !is_explicit(matches, "static_dir")
        && let Some(dir) = config.static_dir.clone()
    {
        args.static_dir = dir;
    }
    if !is_explicit(matches, "max_connections")
        && let Some(max) = config.max_connections
    {
        args.max_connections = ensure_positive_usize(max, "server.max_connections")?;
    }
    Ok(())
}

fn apply_load(args: &mut LoadArgs, matches: &ArgMatches, config: &LoadConfig) -> AppResult<()> {
    if !is_explicit(matches, "url")
        && let Some(url) = config.url.as_deref()
    {
        args.url = parse_ws_url(url)?;
    }
    if !is_explicit(matches, "connections")
        && let Some(connections) = config.connections
    {
        args.connections = ensure_positive_usize(connections, "load.connections")?;
    }
    apply_duration(matches, "ramp_up", config.ramp_up.as_ref(), &mut args.ramp_up)?;
    apply_duration(matches, "duration", config.duration.as_ref(), &mut args.duration)?;
    apply_duration(
        matches,
        "close_backoff",
        config.close_backoff.as_ref(),
        &mut args.close_backoff,
    )?;
    apply_duration(
        matches,
        "error_backoff",
        config.error_backoff.as_ref(),
        &mut args.error_backoff,
    )?;
    apply_duration(
        matches,
        "connect_timeout",
        config.connect_timeout.as_ref(),
        &mut args.connect_timeout,
    )?;
    apply_duration(matches, "grace", config.grace.as_ref(), &mut args.grace)?;
    if !is_explicit(matches, "sample_every")
        && let Some(every) = config.sample_every
    {
        args.sample_every = ensure_positive_u64(every, "load.sample_every")?;
    }
    Ok(())
}

fn is_explicit(matches: &ArgMatches, name: &str) -> bool {
    matches!(
        matches.value_source(name),
        Some(ValueSource::CommandLine | ValueSource::EnvVariable)
    )
}

fn apply_duration(
    matches: &ArgMatches,
    name: &str,
    value: Option<&DurationValue>,
    target: &mut Duration,
) -> AppResult<()> {
    if is_explicit(matches, name) {
        return Ok(());
    }
    if let Some(value) = value {
        *target = value.to_duration().map_err(|err| {
            AppError::config(ConfigError::InvalidDuration {
                field: name.to_owned(),
                source: err,
            })
        })?;
    }
    Ok(())
}

fn ensure_positive_u64(value: u64, field: &str) -> AppResult<PositiveU64> {
    PositiveU64::try_from(value).map_err(|err| {
        AppError::config(ConfigError::FieldMustBePositive {
            field: field.to_owned(),
            source: err,
        })
    })
}

fn ensure_positive_usize(value: usize, field: &str) -> AppResult<PositiveUsize> {
    PositiveUsize::try_from(value).map_err(|err| {
        AppError::config(ConfigError::FieldMustBePositive {
            field: field.to_owned(),
            source: err,
        })
    })
}
