use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::sync::{mpsc::UnboundedReceiver, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{planner::SegmentDescriptor, storage::SessionFiles, util, util::Upstream};

/// What the reassembler may rely on: every index up to `highest` has been
/// handed to a fetch task, and once `closed` no fetch is running anymore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchProgress {
    pub highest: u64,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Staged(usize),
    Empty,
    Failed,
    /// The reassembler already moved past this index
    Late,
    Cancelled,
}

#[derive(Clone)]
pub struct Fetcher {
    upstream: Arc<dyn Upstream>,
    files: SessionFiles,
    timeout: Duration,
    /// Next index the reassembler will read. Everything below it has been
    /// written or given up on.
    consumed: watch::Receiver<u64>,
}

impl Fetcher {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        files: SessionFiles,
        timeout: Duration,
        consumed: watch::Receiver<u64>,
    ) -> Self {
        Self {
            upstream,
            files,
            timeout,
            consumed,
        }
    }

    /// Download one segment and stage it under its index. Nothing is staged
    /// for empty, failed or late downloads. Cancellation only interrupts the
    /// download, never a half-written artifact.
    pub async fn fetch(
        &self,
        segment: &SegmentDescriptor,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let url = match segment.url() {
            Ok(url) => url,
            Err(e) => {
                warn!("Invalid segment URL {}: {}", segment.path, e);
                return FetchOutcome::Failed;
            }
        };

        let download =
            tokio::time::timeout(self.timeout, self.upstream.fetch_bytes(url.as_str()));
        let body = tokio::select! {
            _ = cancel.cancelled() => return FetchOutcome::Cancelled,
            result = download => match result {
                Ok(Ok(body)) => body,
                Ok(Err(e)) => {
                    warn!("Could not fetch segment {}: {}", segment.index, e);
                    return FetchOutcome::Failed;
                }
                Err(_) => {
                    warn!(
                        "Segment {} did not finish within {}s",
                        segment.index,
                        self.timeout.as_secs_f64()
                    );
                    return FetchOutcome::Failed;
                }
            },
        };

        debug!(
            "Fetched {} ({})",
            segment.path,
            util::format_bytes(body.len() as u64)
        );
        if body.is_empty() {
            warn!("Skipping empty segment {}", segment.path);
            return FetchOutcome::Empty;
        }
        if segment.index < *self.consumed.borrow() {
            warn!("Segment {} arrived after it was skipped", segment.index);
            return FetchOutcome::Late;
        }

        match self.files.stage(segment.index, &body).await {
            Ok(()) => FetchOutcome::Staged(body.len()),
            Err(e) => {
                warn!("Could not stage segment {}: {}", segment.index, e);
                FetchOutcome::Failed
            }
        }
    }
}

/// Run fetches for every descriptor the poller sends, at most
/// `max_concurrent` at a time, until the poller hangs up.
pub async fn run_stage(
    fetcher: Fetcher,
    segments: UnboundedReceiver<SegmentDescriptor>,
    max_concurrent: usize,
    progress: watch::Sender<DispatchProgress>,
    cancel: &CancellationToken,
) {
    let fetcher = &fetcher;
    let progress_ref = &progress;

    UnboundedReceiverStream::new(segments)
        .for_each_concurrent(max_concurrent.max(1), |segment| {
            progress_ref.send_modify(|p| p.highest = p.highest.max(segment.index));
            async move {
                let outcome = fetcher.fetch(&segment, cancel).await;
                trace!("Segment {} finished: {:?}", segment.index, outcome);
            }
        })
        .await;

    progress.send_modify(|p| p.closed = true);
}
