use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use physio_overlay::camera;
use physio_overlay::config::{Config, DEFAULT_CONFIG_PATH};
use physio_overlay::protocol::{BodyPart, MovementType};
use physio_overlay::render::{Display, HeadlessDisplay};
use physio_overlay::session::{Session, SessionCommand};
use physio_overlay::telemetry;
use physio_overlay::transport::TransportKind;

#[derive(Parser, Debug)]
#[command(name = "physio-overlay", about = "Live pose/ROM overlay client")]
struct Cli {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// polling | streaming
    #[arg(short, long)]
    transport: Option<TransportKind>,

    #[arg(short, long)]
    body_part: Option<BodyPart>,

    #[arg(short, long)]
    movement: Option<MovementType>,

    /// Use a generated test pattern instead of a camera
    #[arg(long)]
    synthetic: bool,

    /// No preview window; analysis starts automatically
    #[arg(long)]
    headless: bool,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    #[arg(long)]
    session_id: Option<String>,
}

fn default_session_id(kind: TransportKind) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    match kind {
        TransportKind::Streaming => format!("demo_{millis}"),
        TransportKind::Polling => format!("http_demo_{millis}"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)?;
    if let Some(kind) = cli.transport {
        config.analysis.transport = kind;
    }
    if let Some(part) = cli.body_part {
        config.analysis.body_part = part;
    }
    if let Some(movement) = cli.movement {
        config.analysis.movement_type = movement;
    }

    if let Some(path) = telemetry::init(&config.telemetry)? {
        eprintln!("Log: {}", path.display());
    }
    tracing::info!("Physio Overlay ({})", env!("GIT_VERSION"));

    let session_id = cli
        .session_id
        .clone()
        .unwrap_or_else(|| default_session_id(config.analysis.transport));

    let source = match camera::open_source(&config.capture, cli.synthetic) {
        Ok(source) => source,
        Err(e) => {
            tracing::error!("{e}");
            return Err(e.into());
        }
    };

    let headless = cli.headless || !cfg!(feature = "desktop");
    let mut session = Session::from_config(&config, &session_id, headless)
        .context("failed to set up transport")?;
    session.attach_source(source)?;

    let (commands_tx, commands) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            let _ = commands_tx.send(SessionCommand::Shutdown);
        }
    });

    let mut display = open_display(&config, headless)?;
    let deadline = cli
        .duration_secs
        .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

    let stats = session.run(display.as_mut(), commands, deadline).await?;
    tracing::info!(
        sent = stats.sent,
        received = stats.received,
        skipped = stats.skipped,
        dropped = stats.dropped,
        failed = stats.failed,
        malformed = stats.malformed,
        stale = stats.stale,
        "done"
    );
    Ok(())
}

#[cfg(feature = "desktop")]
fn open_display(config: &Config, headless: bool) -> Result<Box<dyn Display>> {
    if headless {
        return Ok(Box::new(HeadlessDisplay::new()));
    }
    tracing::info!("keys: space=start/stop  o=analyze once  c=connect  m=movement  1-6=body part  esc=quit");
    let display = physio_overlay::render::MinifbDisplay::new(
        "Physio Overlay",
        config.capture.width as usize,
        config.capture.height as usize,
    )?;
    Ok(Box::new(display))
}

#[cfg(not(feature = "desktop"))]
fn open_display(_config: &Config, _headless: bool) -> Result<Box<dyn Display>> {
    tracing::info!("built without the desktop feature, running headless");
    Ok(Box::new(HeadlessDisplay::new()))
}
