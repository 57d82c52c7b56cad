// moocd: keeps one creature present on the LAN until Ctrl+C or SIGTERM.

use std::time::{Duration, UNIX_EPOCH};

use anyhow::Context;
use mooc_net::{config, Network};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const REPORT_EVERY: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("moocd {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

async fn run(cfg: config::NetConfig) -> anyhow::Result<()> {
    let born = UNIX_EPOCH + Duration::from_secs(cfg.born_unix_secs);
    let state_file = cfg.state_file.clone();
    let net = Network::with_config(&cfg.name, born, &cfg.stage, true, cfg.clone());

    match std::fs::read(&state_file) {
        Ok(blob) => {
            if let Err(e) = net.import_state(&blob) {
                warn!(
                    path = %state_file.display(),
                    error = %e,
                    "starting with fresh network state"
                );
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %state_file.display(), "no saved state, first run");
        }
        Err(e) => warn!(path = %state_file.display(), error = %e, "cannot read saved state"),
    }

    net.start();
    info!(name = %cfg.name, id = %net.identity().short_id(), "{}", net.status_summary());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(REPORT_EVERY);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                break;
            }
            _ = ticker.tick() => report(&net),
        }
    }

    let blob = net.export_state()?;
    if let Some(dir) = state_file.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    std::fs::write(&state_file, blob)
        .with_context(|| format!("writing {}", state_file.display()))?;
    net.stop();
    info!(path = %state_file.display(), "state saved, goodbye");
    Ok(())
}

fn report(net: &Network) {
    while let Some(line) = net.ambient_message() {
        info!(target: "mooc::ambient", "{}", line);
    }
    if net.should_show_thought() {
        if let Some(thought) = net.narrative_thought() {
            info!(target: "mooc::thought", "{}", thought);
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
