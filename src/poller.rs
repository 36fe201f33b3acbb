use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::Timings,
    hls::{self, PlaylistSnapshot},
    planner::{SegmentDescriptor, SegmentPlanner},
    timer,
    util::Upstream,
};

/// The media playlist could not be read right now. The feed may only be
/// stalled.
#[derive(thiserror::Error, Debug)]
#[error("playlist unavailable: {reason}")]
pub struct Transient {
    pub reason: String,
    pub retry_after: Duration,
}

pub async fn poll_once(
    upstream: &dyn Upstream,
    stream_url: &Url,
    timings: &Timings,
) -> Result<PlaylistSnapshot, Transient> {
    let transient = |reason: String| Transient {
        reason,
        retry_after: timings.transient_retry_delay,
    };

    let body = tokio::time::timeout(
        timings.request_timeout,
        upstream.fetch_playlist(stream_url.as_str()),
    )
    .await
    .map_err(|_| transient("request timed out".to_string()))?
    .map_err(|e| match e.status() {
        Some(status) => transient(format!("status {}", status)),
        None => transient(e.to_string()),
    })?;

    hls::parse_media(&body).map_err(|e| transient(e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Live,
    /// Number of consecutive transient failures so far
    Suspect(u32),
    Offline,
}

/// Confirms that a stream went offline after enough consecutive failures.
#[derive(Debug)]
pub struct OfflineTracker {
    failures: u32,
    threshold: u32,
}

impl OfflineTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: 0,
            threshold,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn state(&self) -> PollerState {
        match self.failures {
            0 => PollerState::Live,
            n if n > self.threshold => PollerState::Offline,
            n => PollerState::Suspect(n),
        }
    }

    pub fn record_failure(&mut self) -> PollerState {
        if self.state() != PollerState::Offline {
            self.failures += 1;
        }
        self.state()
    }

    pub fn record_success(&mut self) -> PollerState {
        if self.state() != PollerState::Offline {
            self.failures = 0;
        }
        self.state()
    }
}

/// Polls the live media playlist of one session and feeds new segments to
/// the fetch stage until the stream is confirmed offline.
pub struct Poller {
    upstream: Arc<dyn Upstream>,
    stream_url: Url,
    segment_base: Url,
    planner: SegmentPlanner,
    tracker: OfflineTracker,
    timings: Timings,
}

impl Poller {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        stream_url: Url,
        planner: SegmentPlanner,
        tracker: OfflineTracker,
        timings: Timings,
    ) -> Result<Self, url::ParseError> {
        let segment_base = stream_url.join(".")?;
        Ok(Self {
            upstream,
            stream_url,
            segment_base,
            planner,
            tracker,
            timings,
        })
    }

    /// Returns the number of segments dispatched.
    pub async fn run(
        mut self,
        dispatch: UnboundedSender<SegmentDescriptor>,
        cancel: &CancellationToken,
    ) -> u64 {
        loop {
            let wait = match poll_once(&*self.upstream, &self.stream_url, &self.timings).await {
                Ok(snapshot) => {
                    if self.tracker.failures() > 0 {
                        info!("Playlist is reachable again");
                    }
                    self.tracker.record_success();

                    for segment in self.planner.plan(&snapshot, &self.segment_base) {
                        debug!("Dispatching segment {} ({})", segment.index, segment.path);
                        if dispatch.send(segment).is_err() {
                            warn!("Fetch stage is gone, stopping poller");
                            return self.dispatched();
                        }
                    }

                    if snapshot.ended {
                        info!("Playlist has ended, stream is offline");
                        break;
                    }
                    snapshot.poll_interval(self.timings.min_poll_interval)
                }
                Err(e) => {
                    if self.tracker.record_failure() == PollerState::Offline {
                        info!(
                            "Could not get the playlist after {} retries, stream is offline",
                            self.tracker.threshold
                        );
                        break;
                    }
                    warn!(
                        "{}, retrying ({}/{})",
                        e,
                        self.tracker.failures(),
                        self.tracker.threshold
                    );
                    e.retry_after
                }
            };

            if !timer::sleep(wait, cancel).await {
                info!("Capture cancelled");
                break;
            }
        }

        self.dispatched()
    }

    fn dispatched(&self) -> u64 {
        self.planner.next_index() - 1
    }
}
