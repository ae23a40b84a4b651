use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::codec::{encode_line, WireDecode};
use crate::error::QueueError;
use crate::model::Fix;
use crate::transport::FrameSink;

/// Pause between replayed entries so a drain does not saturate the link.
pub const DEFAULT_REPLAY_DELAY: Duration = Duration::from_millis(100);

/// Result of a [`OfflineQueue::clean`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub kept: usize,
    pub dropped_incomplete: usize,
    pub dropped_unparseable: usize,
}

impl CleanReport {
    pub fn dropped(&self) -> usize {
        self.dropped_incomplete + self.dropped_unparseable
    }
}

/// Append-only file of complete fixes awaiting upstream delivery, one JSON
/// object per line.
///
/// Every operation takes the same lock, so appends never interleave with a
/// clean or a drain.
pub struct OfflineQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OfflineQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        OfflineQueue {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_error(&self, source: std::io::Error) -> QueueError {
        QueueError::Storage {
            path: self.path.clone(),
            source,
        }
    }

    /// Append one fix. Incomplete fixes are refused and `Ok(false)` is returned.
    pub async fn append(&self, fix: &Fix) -> Result<bool, QueueError> {
        let _guard = self.lock.lock().await;
        self.append_locked(fix).await
    }

    /// Take the queue lock, then append every fix `collect` yields, in order.
    ///
    /// `collect` runs with the lock held, so an append issued by anyone
    /// else after `collect` started lands behind the whole batch.
    pub async fn append_batch<F>(&self, collect: F) -> Result<usize, QueueError>
    where
        F: FnOnce() -> Vec<Fix>,
    {
        let _guard = self.lock.lock().await;
        let mut written = 0;
        for fix in collect() {
            if self.append_locked(&fix).await? {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn append_locked(&self, fix: &Fix) -> Result<bool, QueueError> {
        if !fix.is_complete() {
            info!(target: "queue", "Skipping offline logging of incomplete fix {}", fix.timestamp);
            return Ok(false);
        }
        let mut line = encode_line(fix)?;
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.storage_error(e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.storage_error(e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.storage_error(e))?;
        file.flush().await.map_err(|e| self.storage_error(e))?;

        debug!(target: "queue", "Logged offline fix {} to {}", fix.timestamp, self.path.display());
        Ok(true)
    }

    /// Rewrite the file keeping only lines that decode to a complete fix,
    /// in their original order.
    pub async fn clean(&self) -> Result<CleanReport, QueueError> {
        let _guard = self.lock.lock().await;
        self.clean_locked().await.map(|(report, _)| report)
    }

    /// Decoded entries currently in the file, skipping unparseable lines.
    pub async fn pending(&self) -> Result<Vec<Fix>, QueueError> {
        let _guard = self.lock.lock().await;
        let contents = self.read_locked().await?;
        Ok(contents
            .lines()
            .filter_map(|line| Fix::decode_frame(line.as_bytes()).ok())
            .collect())
    }

    /// Clean, then send every remaining entry to `sink` in file order,
    /// pausing `delay` after each. The file is truncated only once every
    /// entry went out; an interrupted replay leaves the cleaned file intact.
    pub async fn drain_and_clear<S: FrameSink>(&self, sink: &mut S, delay: Duration) -> Result<usize, QueueError> {
        let _guard = self.lock.lock().await;
        let (report, lines) = self.clean_locked().await?;
        if lines.is_empty() {
            info!(target: "queue", "No offline data to send");
            return Ok(0);
        }
        info!(target: "queue", "Replaying {} offline entries", report.kept);

        for (sent, line) in lines.iter().enumerate() {
            let mut frame = Vec::with_capacity(line.len() + 1);
            frame.extend_from_slice(line.as_bytes());
            frame.push(b'\n');
            sink.send_frame(&frame)
                .await
                .map_err(|source| QueueError::ReplayInterrupted { sent, source })?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        tokio::fs::write(&self.path, b"")
            .await
            .map_err(|e| self.storage_error(e))?;
        info!(target: "queue", "Finished replay, cleared {}", self.path.display());
        Ok(lines.len())
    }

    async fn read_locked(&self) -> Result<String, QueueError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(self.storage_error(e)),
        }
    }

    async fn clean_locked(&self) -> Result<(CleanReport, Vec<String>), QueueError> {
        let contents = self.read_locked().await?;
        let mut report = CleanReport::default();
        let mut kept = Vec::new();

        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            match Fix::decode_frame(line.as_bytes()) {
                Ok(fix) if fix.is_complete() => kept.push(line.to_string()),
                Ok(_) => report.dropped_incomplete += 1,
                Err(e) => {
                    warn!(target: "queue", "Dropping unparseable offline entry ({}): {}", e, line);
                    report.dropped_unparseable += 1;
                }
            }
        }
        report.kept = kept.len();

        if report.dropped() > 0 {
            let mut rewritten = kept.join("\n");
            rewritten.push('\n');
            if kept.is_empty() {
                rewritten.clear();
            }
            let tmp = self.path.with_extension("tmp");
            tokio::fs::write(&tmp, rewritten.as_bytes())
                .await
                .map_err(|e| self.storage_error(e))?;
            tokio::fs::rename(&tmp, &self.path)
                .await
                .map_err(|e| self.storage_error(e))?;
            info!(
                target: "queue",
                "Cleaned offline data: kept {}, dropped {} incomplete and {} unparseable",
                report.kept,
                report.dropped_incomplete,
                report.dropped_unparseable
            );
        }
        Ok((report, kept))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SourceSnapshot, SourceTag};
    use std::io;
    use std::sync::Arc;

    fn fix(ts: &str) -> Fix {
        let snap = |gps| SourceSnapshot {
            gps,
            latitude: Some(1.0),
            longitude: Some(2.0),
            altitude: Some(3.0),
            speed: Some(4.0),
            satellites: Some(5),
            satellite_prns: vec![],
        };
        Fix {
            timestamp: ts.into(),
            ship_id: "SHIP456".into(),
            device_id: "d".into(),
            heading: None,
            gps_data: vec![snap(SourceTag::Top), snap(SourceTag::Bottom)],
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<Vec<u8>>,
        fail_after: Option<usize>,
    }

    impl FrameSink for RecordingSink {
        async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            if self.fail_after.is_some_and(|n| self.frames.len() >= n) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            self.frames.push(frame.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_append_refuses_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let queue = OfflineQueue::new(dir.path().join("q.json"));
        let mut partial = fix("a");
        partial.gps_data[0].speed = None;

        assert!(!queue.append(&partial).await.unwrap());
        assert!(queue.append(&fix("b")).await.unwrap());
        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].timestamp, "b");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_append_batch_lands_before_later_appends() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(OfflineQueue::new(dir.path().join("q.json")));
        queue.append(&fix("1")).await.unwrap();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let batch = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move {
                queue
                    .append_batch(move || {
                        started_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        vec![fix("2"), fix("3")]
                    })
                    .await
            }
        });
        started_rx.await.unwrap();
        let late = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.append(&fix("4")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        release_tx.send(()).unwrap();

        assert_eq!(batch.await.unwrap().unwrap(), 2);
        assert!(late.await.unwrap().unwrap());
        let order: Vec<String> = queue.pending().await.unwrap().into_iter().map(|f| f.timestamp).collect();
        assert_eq!(order, vec!["1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_append_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let queue = OfflineQueue::new(dir.path().join("nested/deeper/q.json"));
        queue.append(&fix("a")).await.unwrap();
        assert!(queue.path().exists());
    }

    #[tokio::test]
    async fn test_append_fails_when_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();
        let queue = OfflineQueue::new(blocker.join("q.json"));

        let err = queue.append(&fix("a")).await.unwrap_err();
        assert!(matches!(err, QueueError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_clean_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let queue = OfflineQueue::new(dir.path().join("absent.json"));
        assert_eq!(queue.clean().await.unwrap(), CleanReport::default());
        assert!(!queue.path().exists());
    }

    #[tokio::test]
    async fn test_clean_drops_entry_with_any_incomplete_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        let mut padded = fix("padded");
        let mut extra = padded.gps_data[0].clone();
        extra.altitude = None;
        padded.gps_data.push(extra);
        let good = encode_line(&fix("good")).unwrap();
        std::fs::write(&path, format!("{}\n{}\n", encode_line(&padded).unwrap(), good)).unwrap();

        let queue = OfflineQueue::new(&path);
        let report = queue.clean().await.unwrap();
        assert_eq!(report.kept, 1);
        assert_eq!(report.dropped_incomplete, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{}\n", good));
    }

    #[tokio::test]
    async fn test_clean_drops_unparseable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        let good = encode_line(&fix("good")).unwrap();
        std::fs::write(&path, format!("{{broken\n{}\n\n", good)).unwrap();

        let queue = OfflineQueue::new(&path);
        let report = queue.clean().await.unwrap();
        assert_eq!(report.kept, 1);
        assert_eq!(report.dropped_unparseable, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{}\n", good));
    }

    #[tokio::test]
    async fn test_drain_sends_in_order_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let queue = OfflineQueue::new(dir.path().join("q.json"));
        for ts in ["1", "2", "3"] {
            queue.append(&fix(ts)).await.unwrap();
        }

        let mut sink = RecordingSink::default();
        let sent = queue.drain_and_clear(&mut sink, Duration::ZERO).await.unwrap();
        assert_eq!(sent, 3);
        let order: Vec<String> = sink
            .frames
            .iter()
            .map(|f| Fix::decode_frame(f).unwrap().timestamp)
            .collect();
        assert_eq!(order, vec!["1", "2", "3"]);
        assert!(sink.frames.iter().all(|f| f.ends_with(b"\n")));
        assert_eq!(std::fs::read_to_string(queue.path()).unwrap(), "");
    }

    #[tokio::test]
    async fn test_interrupted_drain_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let queue = OfflineQueue::new(dir.path().join("q.json"));
        for ts in ["1", "2", "3"] {
            queue.append(&fix(ts)).await.unwrap();
        }

        let mut sink = RecordingSink { fail_after: Some(1), ..Default::default() };
        let err = queue.drain_and_clear(&mut sink, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, QueueError::ReplayInterrupted { sent: 1, .. }));
        assert_eq!(queue.pending().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_drain_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = OfflineQueue::new(dir.path().join("q.json"));
        let mut sink = RecordingSink::default();
        assert_eq!(queue.drain_and_clear(&mut sink, Duration::ZERO).await.unwrap(), 0);
        assert!(sink.frames.is_empty());
    }
}
