use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use url::Url;

/// Marker present in the channel page only while a stream is being served.
pub const LIVE_PLAYLIST_MARKER: &str = "playlist.m3u8";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoomDossier {
    #[serde(default)]
    pub hls_source: String,
    pub room_status: Option<String>,
    pub broadcaster_username: Option<String>,
}

/// Where the stream of a room can be fetched from.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSource {
    pub master_url: Url,
    /// Directory of the master playlist, variants resolve against it
    pub base_url: Url,
}

#[derive(thiserror::Error, Debug)]
pub enum RoomError {
    #[error("Could not find the stream source in the channel page")]
    SourceNotFound,
    #[error("Could not decode room dossier")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid stream source URL")]
    InvalidSource(#[from] url::ParseError),
}

fn dossier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"window\.initialRoomDossier = "(.*?)""#).expect("should never happen")
    })
}

/// True if the page advertises a live playlist.
pub fn is_online(html: &str) -> bool {
    html.contains(LIVE_PLAYLIST_MARKER)
}

fn get_dossier_str(html: &str) -> Option<&str> {
    dossier_pattern()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Undo the JavaScript string escaping around the embedded payload. The
/// escapes used by the page (`\uXXXX`, `\"`, `\\`, `\/`) are the JSON ones.
fn unescape(raw: &str) -> Result<String, serde_json::Error> {
    serde_json::from_str(&format!("\"{}\"", raw))
}

impl RoomDossier {
    pub fn from_html(html: &str) -> Result<Self, RoomError> {
        let raw = get_dossier_str(html).ok_or(RoomError::SourceNotFound)?;
        let json = unescape(raw)?;
        serde_json::from_str(&json).map_err(RoomError::Decode)
    }
}

pub fn resolve_source(html: &str) -> Result<StreamSource, RoomError> {
    let dossier = RoomDossier::from_html(html)?;
    if dossier.hls_source.is_empty() {
        return Err(RoomError::SourceNotFound);
    }

    let master_url = Url::parse(&dossier.hls_source)?;
    let base_url = master_url.join(".")?;

    Ok(StreamSource {
        master_url,
        base_url,
    })
}
