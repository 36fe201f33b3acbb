use std::time::Duration;

use m3u8_rs::{MasterPlaylist, Playlist, VariantStream};
use url::Url;

use crate::{
    room::StreamSource,
    util::{DownloadError, Upstream},
};

#[derive(thiserror::Error, Debug)]
pub enum PlaylistError {
    #[error("Could not download playlist")]
    Download(#[from] DownloadError),
    #[error("Could not parse playlist: {0}")]
    Parse(String),
    #[error("Expected a media playlist")]
    NotMedia,
    #[error("Master playlist has no usable variant")]
    NoVariant,
    #[error("Invalid playlist URL")]
    Url(#[from] url::ParseError),
}

/// How the stream variant is picked from a master playlist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum VariantSelection {
    /// The last listed variant. Relies on the upstream listing variants in
    /// ascending bitrate order.
    #[default]
    Last,
    /// The variant advertising the largest `BANDWIDTH`
    HighestBandwidth,
}

impl VariantSelection {
    pub fn select<'a>(&self, master: &'a MasterPlaylist) -> Option<&'a VariantStream> {
        let variants = master.variants.iter().filter(|v| !v.is_i_frame);
        match self {
            VariantSelection::Last => variants.last(),
            VariantSelection::HighestBandwidth => variants.max_by_key(|v| v.bandwidth),
        }
    }
}

/// The result of one successful poll of the media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistSnapshot {
    pub target_duration: f64,
    /// Segment URIs exactly as listed, in playlist order
    pub segments: Vec<String>,
    pub ended: bool,
}

impl PlaylistSnapshot {
    /// Slightly shorter than one segment so consecutive polls overlap.
    pub fn poll_interval(&self, min: Duration) -> Duration {
        let secs = self.target_duration / 1.5;
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs).max(min)
        } else {
            min
        }
    }
}

fn parse(body: &str) -> Result<Playlist, PlaylistError> {
    m3u8_rs::parse_playlist_res(body.as_bytes()).map_err(|e| PlaylistError::Parse(e.to_string()))
}

pub fn parse_media(body: &str) -> Result<PlaylistSnapshot, PlaylistError> {
    let media = match parse(body)? {
        Playlist::MediaPlaylist(pl) => pl,
        Playlist::MasterPlaylist(_) => return Err(PlaylistError::NotMedia),
    };

    Ok(PlaylistSnapshot {
        target_duration: media.target_duration as f64,
        segments: media
            .segments
            .into_iter()
            .map(|s| s.uri)
            .filter(|uri| !uri.is_empty())
            .collect(),
        ended: media.end_list,
    })
}

/// Pick the stream URL out of a master playlist body.
pub fn resolve_variant(
    body: &str,
    source: &StreamSource,
    selection: VariantSelection,
) -> Result<Url, PlaylistError> {
    match parse(body)? {
        Playlist::MasterPlaylist(master) => {
            let variant = selection
                .select(&master)
                .ok_or(PlaylistError::NoVariant)?;
            debug!(
                "Selected variant {} ({} bps) out of {}",
                variant.uri,
                variant.bandwidth,
                master.variants.len()
            );
            Ok(source.base_url.join(&variant.uri)?)
        }
        // Some rooms serve the media playlist directly
        Playlist::MediaPlaylist(_) => Ok(source.master_url.clone()),
    }
}

pub async fn select_variant(
    upstream: &dyn Upstream,
    source: &StreamSource,
    selection: VariantSelection,
) -> Result<Url, PlaylistError> {
    let body = upstream.fetch_text(source.master_url.as_str()).await?;
    resolve_variant(&body, source, selection)
}
