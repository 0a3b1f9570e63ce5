//! Periodic table writer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::tables::LogTables;

const LOG_FILE: &str = "autoscaler.log";

/// Rewrite `<dir>/autoscaler.log` from the tables once per second until
/// cancelled. Write failures are logged and the loop keeps going.
pub async fn run_writer(
    tables: Arc<LogTables>,
    dir: PathBuf,
    include_events: bool,
    cancel: CancellationToken,
) {
    let path = dir.join(LOG_FILE);
    info!(path = %path.display(), "log table writer started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if let Err(e) = write_once(&tables, &dir, include_events) {
                    warn!(error = %e, "failed to write log tables");
                }
            }
            _ = cancel.cancelled() => {
                info!("log table writer stopped");
                return;
            }
        }
    }
}

fn write_once(tables: &LogTables, dir: &PathBuf, include_events: bool) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(LOG_FILE), tables.render(include_events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writer_creates_and_rewrites_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let tables = Arc::new(LogTables::new());
        tables.set_service_replicas("svc", 2);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_writer(
            tables.clone(),
            dir.path().to_path_buf(),
            false,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        cancel.cancel();
        handle.await.unwrap();

        let content = std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        assert!(content.contains("svc"));
    }

    #[test]
    fn write_once_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let tables = LogTables::new();

        tables.set_service_replicas("first", 1);
        write_once(&tables, &dir.path().to_path_buf(), false).unwrap();

        tables.remove_service("first");
        tables.set_service_replicas("second", 1);
        write_once(&tables, &dir.path().to_path_buf(), false).unwrap();

        let content = std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        assert!(!content.contains("first"));
        assert!(content.contains("second"));
    }
}
