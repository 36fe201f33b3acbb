use std::{path::PathBuf, time::Duration};

use url::Url;

use crate::hls::VariantSelection;

pub const DEFAULT_SITE_URL: &str = "https://chaturbate.com/";

/// The channel being watched. Fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ChannelTarget {
    pub channel: String,
    pub site_url: Url,
    pub proxy: Option<String>,
}

impl ChannelTarget {
    pub fn new(channel: &str, site_url: Url, proxy: Option<String>) -> Self {
        Self {
            channel: channel.to_string(),
            site_url,
            proxy,
        }
    }

    pub fn channel_url(&self) -> Result<Url, url::ParseError> {
        self.site_url.join(&self.channel)
    }
}

/// Every delay used by the monitor and capture loops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timings {
    /// How long to wait between online checks while the channel is offline
    pub online_check_interval: Duration,
    /// Suggested delay after a transient playlist failure
    pub transient_retry_delay: Duration,
    /// Lower bound for the derived playlist poll interval
    pub min_poll_interval: Duration,
    /// Delay before the reassembler looks at the first segment
    pub warmup: Duration,
    /// Reassembler sleep while nothing has been dispatched yet
    pub idle_wait: Duration,
    /// Base step of the linear backoff for missing artifacts
    pub missing_backoff: Duration,
    /// Deadline for establishing a connection
    pub connect_timeout: Duration,
    /// Deadline for a single HTTP request, playlist polls included
    pub request_timeout: Duration,
    /// Deadline for a whole segment download, transport retries included
    pub segment_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            online_check_interval: Duration::from_secs(60),
            transient_retry_delay: Duration::from_secs(3),
            min_poll_interval: Duration::from_millis(250),
            warmup: Duration::from_secs(4),
            idle_wait: Duration::from_secs(1),
            missing_backoff: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            segment_timeout: Duration::from_secs(60),
        }
    }
}

impl Timings {
    pub fn with_interval_minutes(mut self, minutes: u64) -> Self {
        self.online_check_interval = Duration::from_secs(minutes.max(1) * 60);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub target: ChannelTarget,
    pub output_dir: PathBuf,
    pub timings: Timings,
    pub variant: VariantSelection,
    pub max_concurrent_fetches: usize,
    /// Consecutive transient poll failures tolerated before going offline
    pub offline_threshold: u32,
    pub missing_attempts: u32,
    pub dedup_capacity: usize,
}

impl CaptureConfig {
    pub fn new(target: ChannelTarget) -> Self {
        Self {
            target,
            output_dir: PathBuf::from("."),
            timings: Timings::default(),
            variant: VariantSelection::default(),
            max_concurrent_fetches: 16,
            offline_threshold: 10,
            missing_attempts: 5,
            dedup_capacity: 4096,
        }
    }

    pub fn channel_dir(&self) -> PathBuf {
        self.output_dir.join(&self.target.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_url() {
        let target = ChannelTarget::new("someone", Url::parse(DEFAULT_SITE_URL).unwrap(), None);
        assert_eq!(
            target.channel_url().unwrap().as_str(),
            "https://chaturbate.com/someone"
        );
    }

    #[test]
    fn interval_minutes() {
        let timings = Timings::default().with_interval_minutes(5);
        assert_eq!(timings.online_check_interval, Duration::from_secs(300));

        let timings = Timings::default().with_interval_minutes(0);
        assert_eq!(timings.online_check_interval, Duration::from_secs(60));
    }
}
