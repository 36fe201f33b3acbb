use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::CaptureConfig,
    room,
    session::{self, SessionError},
    timer,
    util::Upstream,
};

/// Watches the channel and runs a capture session every time it goes
/// online. Only returns on cancellation or a fatal output error.
pub struct Monitor {
    upstream: Arc<dyn Upstream>,
    config: CaptureConfig,
}

impl Monitor {
    pub fn new(upstream: Arc<dyn Upstream>, config: CaptureConfig) -> Self {
        Self { upstream, config }
    }

    pub async fn check_online(&self) -> bool {
        let url = match self.config.target.channel_url() {
            Ok(url) => url,
            Err(e) => {
                warn!("Invalid channel URL: {}", e);
                return false;
            }
        };

        match self.upstream.fetch_text(url.as_str()).await {
            Ok(page) => room::is_online(&page),
            Err(e) => {
                warn!("Could not fetch channel page: {}", e);
                false
            }
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let channel = &self.config.target.channel;
        let interval = self.config.timings.online_check_interval;

        while !cancel.is_cancelled() {
            if self.check_online().await {
                info!("{} is online, starting capture", channel);
                match session::capture(self.upstream.clone(), &self.config, cancel).await {
                    Ok(stats) => {
                        info!("Capture of {} ended: {}", channel, stats);
                        continue;
                    }
                    Err(e) if e.is_fatal() => {
                        error!("Capture of {} failed: {}", channel, e);
                        return Err(e);
                    }
                    Err(e) => warn!("Could not start capturing {}: {}", channel, e),
                }
            } else {
                info!(
                    "{} is offline, checking again in {}s",
                    channel,
                    interval.as_secs()
                );
            }

            if !timer::sleep(interval, cancel).await {
                break;
            }
        }

        info!("Stopped watching {}", channel);
        Ok(())
    }
}
