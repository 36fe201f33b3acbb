//! In-memory upstream used by the pipeline tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::{
    config::Timings,
    util::{DownloadError, Upstream},
};

pub fn fast_timings() -> Timings {
    Timings {
        online_check_interval: Duration::from_millis(20),
        transient_retry_delay: Duration::from_millis(5),
        min_poll_interval: Duration::from_millis(5),
        warmup: Duration::from_millis(10),
        idle_wait: Duration::from_millis(10),
        missing_backoff: Duration::from_millis(20),
        connect_timeout: Duration::from_millis(100),
        request_timeout: Duration::from_millis(100),
        segment_timeout: Duration::from_millis(200),
    }
}

/// Read a fixture from `resources/test/`.
pub fn get_test_resource(fname: &str) -> String {
    let mut d = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    d.push("resources/test/");
    d.push(fname);
    std::fs::read_to_string(d).expect(format!("Could not read {}", fname).as_str())
}

pub fn media_playlist(target_duration: u64, segments: &[&str]) -> String {
    let mut body = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:{}\n#EXT-X-MEDIA-SEQUENCE:1\n",
        target_duration
    );
    for segment in segments {
        body.push_str(&format!("#EXTINF:{}.000,\n{}\n", target_duration, segment));
    }
    body
}

struct FakeSegment {
    body: Vec<u8>,
    delay: Duration,
}

/// Serves pages by URL, media playlists from a queue (every poll after the
/// queue runs dry gets a 403) and segments by URL with an artificial delay.
#[derive(Default)]
pub struct FakeUpstream {
    pages: HashMap<String, String>,
    playlists: Mutex<VecDeque<Result<String, StatusCode>>>,
    segments: HashMap<String, FakeSegment>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    segment_requests: Mutex<Vec<String>>,
    playlist_stalled: bool,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), body.to_string());
        self
    }

    pub fn with_playlist(self, body: &str) -> Self {
        self.playlists
            .lock()
            .unwrap()
            .push_back(Ok(body.to_string()));
        self
    }

    pub fn with_failure(self, status: StatusCode) -> Self {
        self.playlists.lock().unwrap().push_back(Err(status));
        self
    }

    /// Every playlist request hangs without ever answering.
    pub fn with_stalled_playlist(mut self) -> Self {
        self.playlist_stalled = true;
        self
    }

    pub fn with_segment(mut self, url: &str, body: &[u8], delay: Duration) -> Self {
        self.segments.insert(
            url.to_string(),
            FakeSegment {
                body: body.to_vec(),
                delay,
            },
        );
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn segment_requests(&self) -> Vec<String> {
        self.segment_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or(DownloadError::Status(StatusCode::NOT_FOUND))
    }

    async fn fetch_playlist(&self, _url: &str) -> Result<String, DownloadError> {
        if self.playlist_stalled {
            futures::future::pending::<()>().await;
        }
        let next = self.playlists.lock().unwrap().pop_front();
        match next {
            Some(Ok(body)) => Ok(body),
            Some(Err(status)) => Err(DownloadError::Status(status)),
            None => Err(DownloadError::Status(StatusCode::FORBIDDEN)),
        }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.segment_requests.lock().unwrap().push(url.to_string());
        let segment = self
            .segments
            .get(url)
            .ok_or(DownloadError::Status(StatusCode::NOT_FOUND))?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(segment.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(segment.body.clone())
    }
}
