use std::{path::PathBuf, process::ExitCode, sync::Arc};

use channel_dvr::{
    config::{CaptureConfig, ChannelTarget, Timings, DEFAULT_SITE_URL},
    hls::VariantSelection,
    monitor::Monitor,
    util,
};
use clap::Parser;
use log::{error, info};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Watch a live channel and save every broadcast as a local file
#[derive(Parser, Debug)]
#[command(name = "channel-dvr", version)]
struct Args {
    /// Channel username to watch
    #[arg(short, long)]
    username: String,

    /// Minutes to wait between online checks
    #[arg(short, long, default_value_t = 1)]
    interval: u64,

    /// Proxy used for every request
    #[arg(short, long)]
    proxyurl: Option<String>,

    /// Directory the channel folder is created in
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Maximum number of segments downloaded at the same time
    #[arg(long, default_value_t = 16)]
    max_fetches: usize,

    /// How the stream variant is picked from the master playlist
    #[arg(long, value_enum, default_value_t = VariantSelection::Last)]
    variant: VariantSelection,

    /// Base URL of the site hosting the channel
    #[arg(long, default_value = DEFAULT_SITE_URL)]
    site: Url,
}

impl Args {
    fn into_config(self) -> CaptureConfig {
        let target = ChannelTarget::new(&self.username, self.site, self.proxyurl);
        let mut config = CaptureConfig::new(target);
        config.output_dir = self.output;
        config.timings = Timings::default().with_interval_minutes(self.interval);
        config.max_concurrent_fetches = self.max_fetches;
        config.variant = self.variant;
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();

    let client = match util::HttpClient::new(config.target.proxy.as_deref(), &config.timings) {
        Ok(client) => client,
        Err(e) => {
            error!("Could not create HttpClient: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, finishing the current file");
                cancel.cancel();
            }
        });
    }

    info!("Watching {}", config.target.channel);
    let monitor = Monitor::new(Arc::new(client), config);
    match monitor.run(&cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting: {}", e);
            ExitCode::FAILURE
        }
    }
}
