use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;

use crate::ingest::IncidentPipeline;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MISSING_FILE_RETRY: Duration = Duration::from_secs(5);
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(2);

fn source_hint_for(path: &str) -> &'static str {
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();
    if name.contains("signature") {
        "signature_ids"
    } else {
        "host_ids"
    }
}

/// Tail a live IDS alert file. Seeks to the end, polls for new bytes, groups
/// multi-line alerts (a blank line or quiet EOF flushes the buffer as one
/// logical entry) and handles rotation by re-reading from offset zero when
/// the file shrinks. Runs until the owning task is aborted; every sleep is a
/// cancellation point.
pub async fn tail_log_file(path: String, pipeline: Arc<IncidentPipeline>) {
    log::info!("[Tailer] Tailing log file: {}", path);
    let source_hint = source_hint_for(&path);

    // Wait for the file to exist.
    let file = loop {
        match File::open(&path).await {
            Ok(f) => break f,
            Err(_) => {
                log::warn!("[Tailer] File not found: {} - retrying in 5s", path);
                sleep(MISSING_FILE_RETRY).await;
            }
        }
    };

    let mut reader = BufReader::new(file);
    if let Err(e) = reader.seek(SeekFrom::End(0)).await {
        log::error!("[Tailer] Failed to seek to end of {}: {}", path, e);
    }

    let mut buffer: Vec<String> = Vec::new();
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                // No new data: flush any pending single-line alert, then poll.
                if !buffer.is_empty() {
                    let entry = buffer.join("\n");
                    buffer.clear();
                    pipeline.ingest_raw_log(&entry, source_hint).await;
                }
                sleep(POLL_INTERVAL).await;

                // Rotation: the file shrank below our offset.
                if let Ok(meta) = tokio::fs::metadata(&path).await {
                    let pos = reader.stream_position().await.unwrap_or(0);
                    if meta.len() < pos {
                        log::info!("[Tailer] Log rotation detected. Re-reading from start.");
                        if let Err(e) = reader.seek(SeekFrom::Start(0)).await {
                            log::error!("[Tailer] Seek after rotation failed: {}", e);
                        }
                    }
                }
            }
            Ok(_) => {
                let stripped = line.trim();
                if !stripped.is_empty() {
                    buffer.push(stripped.to_string());
                } else if !buffer.is_empty() {
                    // Blank line ends a multi-line host-IDS alert.
                    let entry = buffer.join("\n");
                    buffer.clear();
                    pipeline.ingest_raw_log(&entry, source_hint).await;
                }
            }
            Err(e) => {
                log::error!("[Tailer] Error reading file: {}", e);
                sleep(READ_ERROR_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_follows_filename() {
        assert_eq!(source_hint_for("/var/log/signature_alerts.log"), "signature_ids");
        assert_eq!(source_hint_for("/var/log/host_alerts.log"), "host_ids");
        assert_eq!(source_hint_for("C:\\logs\\SIGNATURE.fast"), "signature_ids");
        // Anything that isn't signature-flavoured defaults to the host agent.
        assert_eq!(source_hint_for("alerts.log"), "host_ids");
    }
}
