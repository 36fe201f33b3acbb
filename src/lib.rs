//! # channel-dvr
//!
//! This crate watches a single live channel served over HLS and records
//! every broadcast into one `.ts` file per session.
//!
//! ## Usage
//!
//! The [`monitor::Monitor`] alternates between checking whether the channel
//! is online and running a capture session. A session polls the live media
//! playlist, fetches new segments concurrently and appends them to the output
//! file strictly in playlist order.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use channel_dvr::{config, monitor::Monitor, util};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let site = url::Url::parse(config::DEFAULT_SITE_URL).unwrap();
//!     let target = config::ChannelTarget::new("someone", site, None);
//!     let config = config::CaptureConfig::new(target);
//!
//!     // reqwest client with cookies, timeouts and retrying middleware
//!     let client = util::HttpClient::new(None, &config.timings).unwrap();
//!
//!     let monitor = Monitor::new(Arc::new(client), config);
//!     monitor.run(&CancellationToken::new()).await.unwrap();
//! }
//! ```
//!
//! Output lands in `{output}/{channel}/{timestamp}.ts`. While a session is
//! running, fetched segments are staged next to it as
//! `{timestamp}~{index}.ts` and removed once appended.

#![forbid(unsafe_code)]
#[macro_use]
extern crate log;

pub mod config;
pub mod fetcher;
pub mod hls;
pub mod monitor;
pub mod planner;
pub mod poller;
pub mod reassembler;
pub mod room;
pub mod session;
pub mod stats;
pub mod storage;
pub mod timer;
pub mod util;

#[cfg(test)]
mod testing;
