//! Fire-and-forget request log. Served requests are appended as CSV rows by
//! a dedicated writer thread; recording never blocks the request path.

use crate::registry::ModelId;
use log::warn;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize)]
pub struct LogRecord {
    pub user_id: Option<String>,
    pub model: ModelId,
    pub input_text: String,
    pub output_text: String,
    pub timestamp: u64,
}

impl LogRecord {
    pub fn new(user_id: Option<String>, model: ModelId, input: &str, output: &str) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            user_id,
            model,
            input_text: input.to_string(),
            output_text: output.to_string(),
            timestamp,
        }
    }
}

pub struct RequestLog {
    tx: mpsc::Sender<LogRecord>,
}

impl RequestLog {
    /// Opens `path` for appending and starts the writer thread. The thread
    /// exits when the last sender is dropped.
    pub fn spawn(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        let (tx, rx) = mpsc::channel::<LogRecord>();

        thread::Builder::new()
            .name("request-log".to_string())
            .spawn(move || {
                for record in rx {
                    if let Err(e) = writer.serialize(&record) {
                        warn!("failed to write request log record: {e}");
                        continue;
                    }
                    if let Err(e) = writer.flush() {
                        warn!("failed to flush request log: {e}");
                    }
                }
            })?;

        Ok(Self { tx })
    }

    /// Queues a record for the writer. Errors are swallowed: losing a log
    /// row must never fail the request that produced it.
    pub fn record(&self, record: LogRecord) {
        let _ = self.tx.send(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn records_are_appended_as_csv_rows() {
        let path = std::env::temp_dir().join(format!(
            "request-log-test-{}.csv",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let log = RequestLog::spawn(&path).unwrap();
        log.record(LogRecord::new(None, ModelId::Ar2en, "مرحباً", "hello"));
        log.record(LogRecord::new(
            Some("u1".to_string()),
            ModelId::Summarize,
            "long text",
            "short text",
        ));

        // The writer thread flushes asynchronously; poll briefly.
        let mut contents = String::new();
        for _ in 0..50 {
            contents = std::fs::read_to_string(&path).unwrap_or_default();
            if contents.lines().count() >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        let _ = std::fs::remove_file(&path);

        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("ar2en"));
        assert!(contents.contains("hello"));
        assert!(contents.contains("u1"));
    }
}
