use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tokio::sync::mpsc;

use crate::telemetry::bus::EventRecord;

/// Append-only JSONL writer, sharded by UTC date. One file per day under the
/// configured directory, one JSON object per line.
struct ShardedWriter {
    dir: PathBuf,
    current_date: NaiveDate,
    file: File,
}

impl ShardedWriter {
    fn open(dir: &Path, date: NaiveDate) -> std::io::Result<(File, PathBuf)> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("events-{}.jsonl", date.format("%Y-%m-%d")));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok((file, path))
    }

    fn new(dir: PathBuf, date: NaiveDate) -> std::io::Result<Self> {
        let (file, path) = Self::open(&dir, date)?;
        tracing::info!(target: "telemetry", path = %path.display(), "event log opened");
        Ok(Self { dir, current_date: date, file })
    }

    fn write(&mut self, record: &EventRecord, date: NaiveDate) -> std::io::Result<()> {
        if date != self.current_date {
            let (file, path) = Self::open(&self.dir, date)?;
            tracing::info!(target: "telemetry", path = %path.display(), "event log rotated");
            self.file = file;
            self.current_date = date;
        }
        let line = serde_json::to_string(record).expect("event record serializes");
        writeln!(self.file, "{}", line)
    }
}

/// Single background task that drains the telemetry channel to disk.
/// Consolidates all event-log I/O off the hot path; flushes on idle gaps and
/// on shutdown.
pub async fn run_recorder(mut rx: mpsc::Receiver<EventRecord>, dir: PathBuf) {
    let mut writer = match ShardedWriter::new(dir, chrono::Utc::now().date_naive()) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(target: "telemetry", "cannot open event log: {e}");
            // Drain so senders never observe a closed channel as an error loop.
            while rx.recv().await.is_some() {}
            return;
        }
    };

    loop {
        match rx.recv().await {
            Some(record) => {
                let date = chrono::Utc::now().date_naive();
                if let Err(e) = writer.write(&record, date) {
                    tracing::error!(target: "telemetry", "event log write failed: {e}");
                }
                // Opportunistically drain whatever is queued before flushing.
                while let Ok(record) = rx.try_recv() {
                    if let Err(e) = writer.write(&record, date) {
                        tracing::error!(target: "telemetry", "event log write failed: {e}");
                    }
                }
                let _ = writer.file.flush();
            }
            None => {
                let _ = writer.file.flush();
                tracing::info!(target: "telemetry", "recorder stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(n: u32, trace: Option<Uuid>) -> EventRecord {
        EventRecord {
            event_type: "pnl_update",
            ts: 1_700_000_000_000 + n as i64,
            trace_id: trace,
            data: serde_json::json!({"n": n}),
        }
    }

    /// Scenario: three records sent, channel closed.
    /// Expected: the day's file holds three JSON lines in order, each with
    /// event_type, ts and data; trace_id omitted when absent.
    #[tokio::test]
    async fn test_records_written_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_recorder(rx, dir.path().to_path_buf()));

        let trace = Uuid::new_v4();
        tx.send(record(1, None)).await.unwrap();
        tx.send(record(2, Some(trace))).await.unwrap();
        tx.send(record(3, None)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let date = chrono::Utc::now().date_naive();
        let path = dir.path().join(format!("events-{}.jsonl", date.format("%Y-%m-%d")));
        let body = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "pnl_update");
        assert_eq!(first["data"]["n"], 1);
        assert!(first.get("trace_id").is_none());

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["trace_id"], trace.to_string());
    }

    /// Re-running against an existing shard appends instead of truncating.
    #[tokio::test]
    async fn test_append_only_across_runs() {
        let dir = tempfile::tempdir().unwrap();

        for run in 0..2u32 {
            let (tx, rx) = mpsc::channel(4);
            let handle = tokio::spawn(run_recorder(rx, dir.path().to_path_buf()));
            tx.send(record(run, None)).await.unwrap();
            drop(tx);
            handle.await.unwrap();
        }

        let date = chrono::Utc::now().date_naive();
        let path = dir.path().join(format!("events-{}.jsonl", date.format("%Y-%m-%d")));
        let body = std::fs::read_to_string(path).unwrap();
        assert_eq!(body.lines().count(), 2);
    }
}
