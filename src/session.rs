use std::{io, sync::Arc};

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    config::CaptureConfig,
    fetcher::{self, DispatchProgress, Fetcher},
    hls::{self, PlaylistError},
    planner::SegmentPlanner,
    poller::{OfflineTracker, Poller},
    reassembler::Reassembler,
    room::{self, RoomError},
    stats::SessionStatistics,
    storage::SessionFiles,
    util::{DownloadError, Upstream},
};

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Could not fetch the channel page")]
    Page(#[from] DownloadError),
    #[error("Could not resolve the stream source")]
    Source(#[from] RoomError),
    #[error("Could not select a stream variant")]
    Playlist(#[from] PlaylistError),
    #[error("Invalid URL")]
    Url(#[from] url::ParseError),
    #[error("Could not write output: {0}")]
    Output(#[source] io::Error),
}

impl SessionError {
    /// Only local output failures are worth stopping the whole process for.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Output(_))
    }
}

/// State of one continuous broadcast. Built fresh for every session and
/// taken apart when the loops start, each part going to its only writer.
#[derive(Debug)]
pub struct CaptureSession {
    pub started_at: DateTime<Local>,
    pub files: SessionFiles,
    pub planner: SegmentPlanner,
    pub tracker: OfflineTracker,
}

impl CaptureSession {
    pub fn new(config: &CaptureConfig, started_at: DateTime<Local>) -> Self {
        Self {
            started_at,
            files: SessionFiles::new(&config.channel_dir(), &started_at),
            planner: SegmentPlanner::new(config.dedup_capacity),
            tracker: OfflineTracker::new(config.offline_threshold),
        }
    }
}

/// Capture one broadcast from the moment the channel is seen online until
/// the playlist is confirmed offline or `cancel` fires.
pub async fn capture(
    upstream: Arc<dyn Upstream>,
    config: &CaptureConfig,
    cancel: &CancellationToken,
) -> Result<SessionStatistics, SessionError> {
    let page = upstream
        .fetch_text(config.target.channel_url()?.as_str())
        .await?;
    let source = room::resolve_source(&page)?;
    debug!("Master playlist: {}", source.master_url);

    let stream_url = hls::select_variant(&*upstream, &source, config.variant).await?;
    debug!("Stream playlist: {}", stream_url);

    let session = CaptureSession::new(config, Local::now());
    session
        .files
        .ensure_dir()
        .await
        .map_err(SessionError::Output)?;
    let master = session
        .files
        .create_master()
        .await
        .map_err(SessionError::Output)?;
    info!("Saving stream to {}", session.files.master().display());

    let (tx_segments, rx_segments) = mpsc::unbounded_channel();
    let (tx_progress, rx_progress) = watch::channel(DispatchProgress::default());
    let (tx_consumed, rx_consumed) = watch::channel(1);

    let poller = Poller::new(
        upstream.clone(),
        stream_url,
        session.planner,
        session.tracker,
        config.timings,
    )?;
    let fetcher = Fetcher::new(
        upstream.clone(),
        session.files.clone(),
        config.timings.segment_timeout,
        rx_consumed,
    );
    let reassembler = Reassembler::new(
        session.files,
        master,
        rx_progress,
        tx_consumed,
        config.timings,
        config.missing_attempts,
    );

    let (dispatched, (), report) = futures::join!(
        poller.run(tx_segments, cancel),
        fetcher::run_stage(
            fetcher,
            rx_segments,
            config.max_concurrent_fetches,
            tx_progress,
            cancel
        ),
        reassembler.run(cancel),
    );
    let report = report.map_err(SessionError::Output)?;

    Ok(SessionStatistics::new(dispatched, &report))
}
