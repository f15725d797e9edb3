
use std::time::Duration;

use clap::Parser;
use telecast::args::{Cli, Command, LoadArgs};
use telecast::load::run_load;
use telecast::shutdown_handlers::shutdown_channel;

use support_server::{fast_settings, spawn_server};

fn load_args(url: &str, connections: &str, duration: &str) -> Result<LoadArgs, String> {
    let cli = Cli::try_parse_from([
        "telecast",
        "load",
        "--url",
        url,
        "--connections",
        connections,
        "--ramp-up",
        "50ms",
        "--duration",
        duration,
        "--close-backoff",
        "100ms",
        "--error-backoff",
        "300ms",
        "--connect-timeout",
        "1s",
        "--sample-every",
        "5",
        "--grace",
        "2s",
    ])
    .map_err(|err| format!("parse failed: {}", err))?;
    match cli.command {
        Command::Load(args) => Ok(args),
        Command::Serve(_) => Err("expected load command".to_owned()),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_load_ramps_to_target_and_receives_pushes() -> Result<(), String> {
    let server = spawn_server(fast_settings()).await?;
    let args = load_args(&server.ws_url(), "3", "2500ms")?;
    let (shutdown_tx, _) = shutdown_channel();

    let summary = run_load(&args, &shutdown_tx)
        .await
        .map_err(|err| format!("load failed: {}", err))?;

    if summary.peak_active != 3 {
        return Err(format!("expected peak of 3, got {:?}", summary));
    }
    if summary.sampled_peak() > 3 {
        return Err(format!("sampled active exceeded target: {:?}", summary));
    }
    if summary.samples.last().map(|sample| sample.active) != Some(3) {
        return Err(format!("active did not converge to 3: {:?}", summary.samples));
    }
    if summary.failed != 0 {
        return Err(format!("unexpected failures: {:?}", summary));
    }
    if summary.total_messages < 3 {
        return Err(format!("too few messages: {:?}", summary));
    }
    if summary.samples.is_empty() {
        return Err("no samples recorded".to_owned());
    }

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_load_counts_failures_against_dead_endpoint() -> Result<(), String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|err| format!("bind failed: {}", err))?;
    let addr = listener
        .local_addr()
        .map_err(|err| format!("addr failed: {}", err))?;
    drop(listener);

    let args = load_args(&format!("ws://{}", addr), "2", "1s")?;
    let (shutdown_tx, _) = shutdown_channel();
    let summary = run_load(&args, &shutdown_tx)
        .await
        .map_err(|err| format!("load failed: {}", err))?;

    if summary.peak_active != 0 {
        return Err(format!("nothing should connect: {:?}", summary));
    }
    // Two slots, each retrying every 300ms for one second.
    if summary.failed < 2 || summary.failed > 10 {
        return Err(format!("unexpected failure count: {:?}", summary));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_load_stops_early_on_shutdown() -> Result<(), String> {
    let server = spawn_server(fast_settings()).await?;
    let args = load_args(&server.ws_url(), "2", "60s")?;
    let (shutdown_tx, _) = shutdown_channel();

    let trigger = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        drop(trigger.send(()));
    });

    let summary = tokio::time::timeout(Duration::from_secs(10), run_load(&args, &shutdown_tx))
        .await
        .map_err(|err| format!("load did not stop on shutdown: {}", err))?
        .map_err(|err| format!("load failed: {}", err))?;
    if summary.duration > Duration::from_secs(5) {
        return Err(format!("run took too long: {:?}", summary.duration));
    }
    server.stop().await
}
