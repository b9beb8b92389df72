use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::TelemetryConfig;

/// ログファイル名（起動時刻入り）
pub fn log_file_path(dir: &Path, now: chrono::DateTime<chrono::Local>) -> PathBuf {
    dir.join(format!("client_{}.log", now.format("%Y%m%d_%H%M%S")))
}

/// tracing の購読者を設定する。ファイル出力時はそのパスを返す
pub fn init(config: &TelemetryConfig) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .with_context(|| format!("invalid log filter {:?}", config.log_filter))?;

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_timer(fmt::time::uptime())
        .with_writer(std::io::stderr);

    let (file_layer, path) = if config.log_dir.is_empty() {
        (None, None)
    } else {
        let dir = Path::new(&config.log_dir);
        fs::create_dir_all(dir).with_context(|| format!("failed to create log dir {}", dir.display()))?;
        let path = log_file_path(dir, chrono::Local::now());
        let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
        let layer = fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file));
        (Some(layer), Some(path))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_name_uses_timestamp() {
        let now = chrono::Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let path = log_file_path(Path::new("logs"), now);
        assert_eq!(path, PathBuf::from("logs/client_20240309_140507.log"));
    }
}
