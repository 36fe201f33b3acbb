use std::{io, time::Duration};

use tokio::{fs::File, io::AsyncWriteExt, sync::watch};
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Timings,
    fetcher::DispatchProgress,
    storage::{SessionFiles, StagingError},
    timer,
};

/// Linear backoff used while waiting for a staged artifact: `base`,
/// `2 * base`, ... up to `attempts` steps.
pub fn missing_backoff(base: Duration, attempts: u32) -> impl Iterator<Item = Duration> {
    (1..=attempts).map(move |n| base * n)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReassemblyReport {
    pub written: u64,
    pub bytes_written: u64,
    /// Indices that never showed up and were skipped
    pub lost: Vec<u64>,
}

/// Appends staged artifacts to the master file strictly in index order.
///
/// The reassembler is the only writer of the master file and the only one
/// deleting artifacts. It keeps going until the fetch stage is closed and
/// every dispatched index has been either written or given up on, then
/// removes whatever is still staged.
pub struct Reassembler {
    files: SessionFiles,
    master: File,
    progress: watch::Receiver<DispatchProgress>,
    consumed: watch::Sender<u64>,
    timings: Timings,
    missing_attempts: u32,
    cursor: u64,
    report: ReassemblyReport,
}

impl Reassembler {
    pub fn new(
        files: SessionFiles,
        master: File,
        progress: watch::Receiver<DispatchProgress>,
        consumed: watch::Sender<u64>,
        timings: Timings,
        missing_attempts: u32,
    ) -> Self {
        Self {
            files,
            master,
            progress,
            consumed,
            timings,
            missing_attempts,
            cursor: 1,
            report: ReassemblyReport::default(),
        }
    }

    pub async fn run(mut self, cancel: &CancellationToken) -> io::Result<ReassemblyReport> {
        timer::sleep(self.timings.warmup, cancel).await;

        loop {
            let progress = *self.progress.borrow();

            if self.cursor > progress.highest {
                if progress.closed {
                    break;
                }
                tokio::time::sleep(self.timings.idle_wait).await;
                continue;
            }

            let index = self.cursor;
            match self.wait_for_artifact(index).await {
                Ok(body) => {
                    self.master.write_all(&body).await?;
                    if let Err(e) = self.files.discard(index).await {
                        warn!("Could not remove staged segment {}: {}", index, e);
                    }
                    self.report.written += 1;
                    self.report.bytes_written += body.len() as u64;
                    debug!(
                        "Appended segment {} to master file (dispatched: {})",
                        index, progress.highest
                    );
                }
                Err(e) => {
                    warn!("Giving up on segment {}: {}", index, e);
                    self.report.lost.push(index);
                }
            }
            self.cursor += 1;
            self.consumed.send_replace(self.cursor);
        }

        // no fetch is running anymore, anything left is a skipped segment
        // that showed up late or a partial write
        match self.files.sweep_staged().await {
            Ok(0) => {}
            Ok(n) => debug!("Removed {} leftover staged files", n),
            Err(e) => warn!("Could not clean up staged files: {}", e),
        }

        self.master.flush().await?;
        Ok(self.report)
    }

    /// Read the artifact at `index`, backing off while it is missing. Once
    /// the fetch stage is closed nothing new can arrive, so there is no point
    /// in waiting.
    async fn wait_for_artifact(&self, index: u64) -> Result<Vec<u8>, StagingError> {
        let files = &self.files;
        let progress = &self.progress;
        let attempts = self.missing_attempts;
        let mut attempt = 0;

        RetryIf::spawn(
            missing_backoff(self.timings.missing_backoff, attempts),
            move || {
                if attempt > 0 {
                    debug!(
                        "Segment {} not staged yet, retrying ({}/{})",
                        index, attempt, attempts
                    );
                }
                attempt += 1;
                files.read(index)
            },
            |e: &StagingError| e.is_missing() && !progress.borrow().closed,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;
    use crate::testing::fast_timings;

    fn consumed() -> watch::Sender<u64> {
        watch::channel(1).0
    }

    async fn setup(dir: &std::path::Path) -> (SessionFiles, File) {
        let files = SessionFiles::new(dir, &Local::now());
        files.ensure_dir().await.unwrap();
        let master = files.create_master().await.unwrap();
        (files, master)
    }

    #[test]
    fn backoff_is_linear() {
        let steps: Vec<_> = missing_backoff(Duration::from_secs(1), 5).collect();
        assert_eq!(
            steps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(4),
                Duration::from_secs(5),
            ]
        );
    }

    #[tokio::test]
    async fn out_of_order_arrival() {
        let tmp = tempfile::tempdir().unwrap();
        let (files, master) = setup(tmp.path()).await;
        let (progress_tx, progress_rx) = watch::channel(DispatchProgress {
            highest: 3,
            closed: false,
        });

        let staging = {
            let files = files.clone();
            tokio::spawn(async move {
                files.stage(3, b"33").await.unwrap();
                tokio::time::sleep(Duration::from_millis(15)).await;
                files.stage(2, b"22").await.unwrap();
                tokio::time::sleep(Duration::from_millis(30)).await;
                files.stage(1, b"11").await.unwrap();
                progress_tx.send_modify(|p| p.closed = true);
            })
        };

        let reassembler =
            Reassembler::new(files.clone(), master, progress_rx, consumed(), fast_timings(), 5);
        let report = reassembler.run(&CancellationToken::new()).await.unwrap();
        staging.await.unwrap();

        assert_eq!(std::fs::read(files.master()).unwrap(), b"112233");
        assert_eq!(report.written, 3);
        assert_eq!(report.bytes_written, 6);
        assert!(report.lost.is_empty());
        for i in 1..=3 {
            assert!(!files.artifact(i).exists());
        }
    }

    #[tokio::test]
    async fn missing_segment_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let (files, master) = setup(tmp.path()).await;
        for i in [1, 2, 4, 5] {
            files.stage(i, format!("<{}>", i).as_bytes()).await.unwrap();
        }
        let (progress_tx, progress_rx) = watch::channel(DispatchProgress {
            highest: 5,
            closed: false,
        });

        let mut timings = fast_timings();
        timings.missing_backoff = Duration::from_millis(5);
        let reassembler =
            Reassembler::new(files.clone(), master, progress_rx, consumed(), timings, 5);

        let started = std::time::Instant::now();
        let handle = tokio::spawn(async move { reassembler.run(&CancellationToken::new()).await });

        // keep the stage open long enough for the full backoff on segment 3
        tokio::time::sleep(Duration::from_millis(400)).await;
        progress_tx.send_modify(|p| p.closed = true);
        let report = handle.await.unwrap().unwrap();

        // 5 + 10 + 15 + 20 + 25 ms of backoff before skipping
        assert!(started.elapsed() >= Duration::from_millis(75));
        assert_eq!(std::fs::read(files.master()).unwrap(), b"<1><2><4><5>");
        assert_eq!(report.lost, vec![3]);
        assert_eq!(report.written, 4);
    }

    #[tokio::test]
    async fn closed_stage_skips_without_backoff() {
        let tmp = tempfile::tempdir().unwrap();
        let (files, master) = setup(tmp.path()).await;
        files.stage(2, b"two").await.unwrap();
        let (_progress_tx, progress_rx) = watch::channel(DispatchProgress {
            highest: 2,
            closed: true,
        });

        let mut timings = fast_timings();
        timings.missing_backoff = Duration::from_secs(10);
        let reassembler =
            Reassembler::new(files.clone(), master, progress_rx, consumed(), timings, 5);

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            reassembler.run(&CancellationToken::new()),
        )
        .await
        .expect("reassembler should not back off")
        .unwrap();

        assert_eq!(report.lost, vec![1]);
        assert_eq!(std::fs::read(files.master()).unwrap(), b"two");
    }

    #[tokio::test]
    async fn leftovers_are_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let (files, master) = setup(tmp.path()).await;
        files.stage(1, b"one").await.unwrap();
        // skipped earlier and staged afterwards, plus an interrupted write
        files.stage(7, b"seven").await.unwrap();
        let partial = files.artifact(8).with_extension("ts.tmp");
        std::fs::write(&partial, b"eig").unwrap();

        let (_progress_tx, progress_rx) = watch::channel(DispatchProgress {
            highest: 1,
            closed: true,
        });
        let (consumed_tx, consumed_rx) = watch::channel(1);
        let reassembler =
            Reassembler::new(files.clone(), master, progress_rx, consumed_tx, fast_timings(), 5);
        reassembler.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(*consumed_rx.borrow(), 2);
        let names: Vec<_> = std::fs::read_dir(files.dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(names, vec![files.master()]);
        assert_eq!(std::fs::read(files.master()).unwrap(), b"one");
    }

    #[tokio::test]
    async fn nothing_dispatched() {
        let tmp = tempfile::tempdir().unwrap();
        let (files, master) = setup(tmp.path()).await;
        let (progress_tx, progress_rx) = watch::channel(DispatchProgress::default());
        progress_tx.send_modify(|p| p.closed = true);

        let reassembler =
            Reassembler::new(files.clone(), master, progress_rx, consumed(), fast_timings(), 5);
        let report = reassembler.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report, ReassemblyReport::default());
        assert!(std::fs::read(files.master()).unwrap().is_empty());
    }
}
