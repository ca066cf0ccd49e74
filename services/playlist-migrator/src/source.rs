//!
//! src/source.rs
//!
//! Source catalog (YouTube) reader: playlist url parsing, playlist metadata,
//! and paginated item listing normalized into `SourceTrack`s
//!

use std::sync::LazyLock;

use regex::Regex;
use reqwest::RequestBuilder;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::MigrateError;
use crate::fetch::YouTubeClient;
use crate::types::{SourcePlaylist, SourceTrack, UNKNOWN_ARTIST};

const UNAVAILABLE_TITLES: [&str; 2] = ["Deleted video", "Private video"];
const ARTIST_SEPARATOR: &str = " - ";

static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$")
        .expect("duration pattern compiles")
});

/// Pulls the `list` id out of the url shapes YouTube hands out:
/// `/playlist?list=`, `/watch?v=..&list=`, `/watch?list=` and `youtu.be/..?list=`
pub fn extract_playlist_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let url = Url::parse(raw)
        .or_else(|_| Url::parse(&format!("https://{raw}")))
        .ok()?;

    let host = url.host_str()?.to_ascii_lowercase();
    let recognised = match host.as_str() {
        "youtube.com" | "www.youtube.com" | "m.youtube.com" | "music.youtube.com" =>
            matches!(url.path(), "/playlist" | "/watch"),
        "youtu.be" => url.path().len() > 1,
        _ => false
    };
    if !recognised {
        return None;
    }

    url.query_pairs()
        .find(|(k, _)| k == "list")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// `PT3M45S` -> 225. None for anything that is not an ISO-8601 duration
/// or does not fit in a u32 of seconds
pub fn parse_iso8601_duration(raw: &str) -> Option<u32> {
    let caps = ISO_DURATION.captures(raw.trim())?;
    if caps.iter().skip(1).all(|c| c.is_none()) {
        return None;
    }
    let part = |i: usize, unit: u32| -> Option<u32> {
        match caps.get(i) {
            Some(m) => m.as_str().parse::<u32>().ok()?.checked_mul(unit),
            None => Some(0)
        }
    };
    part(1, 86_400)?
        .checked_add(part(2, 3_600)?)?
        .checked_add(part(3, 60)?)?
        .checked_add(part(4, 1)?)
}

/// "Artist - Title" uploads carry their artist; everything else gets the sentinel.
///
/// Only a spaced `" - "` separates, so hyphenated names such as `Jay-Z` stay
/// whole, and the track title is the part after the separator rather than the
/// full upload title
fn split_artist(title: &str) -> (String, String) {
    match title.split_once(ARTIST_SEPARATOR) {
        Some((artist, rest)) if !artist.trim().is_empty() && !rest.trim().is_empty() =>
            (artist.trim().to_string(), rest.trim().to_string()),
        _ => (UNKNOWN_ARTIST.to_string(), title.trim().to_string())
    }
}

fn best_thumbnail(thumbnails: Option<&Value>) -> Option<String> {
    let thumbnails = thumbnails?;
    ["high", "medium", "default"].iter()
        .find_map(|size| thumbnails.pointer(&format!("/{size}/url")).and_then(Value::as_str))
        .map(str::to_string)
}

fn parse_item(item: &Value) -> Option<SourceTrack> {
    let snippet = item.get("snippet")?;
    let raw_title = snippet.get("title")?.as_str()?;
    if UNAVAILABLE_TITLES.contains(&raw_title) {
        return None;
    }
    let id = item.pointer("/contentDetails/videoId")
        .or_else(|| snippet.pointer("/resourceId/videoId"))
        .and_then(Value::as_str)?
        .to_string();
    let (artist, title) = split_artist(raw_title);

    Some(SourceTrack {
        id,
        title,
        artist,
        duration_seconds: None,
        thumbnail: best_thumbnail(snippet.get("thumbnails")),
    })
}

pub struct YouTubeCatalog {
    client: YouTubeClient,
}

impl YouTubeCatalog {
    pub fn new(client: YouTubeClient) -> Self {
        Self { client }
    }

    async fn get_json(&self, request: RequestBuilder, what: &'static str) ->
        Result<Value, MigrateError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, step = what, "youtube.request.failed");
            return Err(MigrateError::UpstreamUnavailable {
                service: what,
                status: status.as_u16()
            });
        }
        Ok(response.json::<Value>().await?)
    }

    /// Metadata plus every playable track
    pub async fn fetch_playlist(&self, playlist_id: &str) ->
        Result<SourcePlaylist, MigrateError> {
        let mut playlist = self.fetch_playlist_details(playlist_id).await?;
        playlist.tracks = self.fetch_playlist_tracks(playlist_id).await?;
        Ok(playlist)
    }

    pub async fn fetch_playlist_details(&self, playlist_id: &str) ->
        Result<SourcePlaylist, MigrateError> {
        let body = self.get_json(self.client.playlist(playlist_id)?, "youtube playlists").await?;
        let item = body.get("items")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .ok_or_else(|| MigrateError::NotFound(format!("playlist {playlist_id}")))?;

        let snippet = item.get("snippet");
        let text = |key: &str| snippet
            .and_then(|s| s.get(key))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(SourcePlaylist {
            id: item.get("id").and_then(Value::as_str).unwrap_or(playlist_id).to_string(),
            title: text("title").unwrap_or_default(),
            description: text("description").filter(|d| !d.is_empty()),
            thumbnail: best_thumbnail(snippet.and_then(|s| s.get("thumbnails"))),
            item_count: item.pointer("/contentDetails/itemCount")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            creator: text("channelTitle").unwrap_or_default(),
            tracks: Vec::new(),
        })
    }

    /// Walks `nextPageToken` until exhausted, pausing between pages
    pub async fn fetch_playlist_tracks(&self, playlist_id: &str) ->
        Result<Vec<SourceTrack>, MigrateError> {
        let mut tracks = Vec::new();
        let mut page_token: Option<String> = None;
        let mut page = 0_usize;

        loop {
            let request = self.client.playlist_items(playlist_id, page_token.as_deref())?;
            let body = self.get_json(request, "youtube playlist items").await?;

            let mut batch: Vec<SourceTrack> = body.get("items")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(parse_item).collect())
                .unwrap_or_default();
            self.enrich_durations(&mut batch).await;
            debug!(playlist = %playlist_id, page, items = batch.len(), "youtube.page");
            tracks.extend(batch);

            page_token = body.get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
            page += 1;
            sleep(self.client.cfg.page_delay).await;
        }

        info!(playlist = %playlist_id, tracks = tracks.len(), pages = page + 1, "youtube.fetched");
        Ok(tracks)
    }

    /// Best effort: a failed lookup leaves durations unknown
    async fn enrich_durations(&self, tracks: &mut [SourceTrack]) {
        if tracks.is_empty() {
            return;
        }
        let ids = tracks.iter().map(|t| t.id.as_str()).collect::<Vec<_>>().join(",");
        let body = match self.client.videos(&ids) {
            Ok(request) => self.get_json(request, "youtube videos").await,
            Err(e) => Err(e)
        };
        let body = match body {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "youtube.durations.skipped");
                return;
            }
        };

        let Some(items) = body.get("items").and_then(Value::as_array) else { return };
        for item in items {
            let Some(id) = item.get("id").and_then(Value::as_str) else { continue };
            let seconds = item.pointer("/contentDetails/duration")
                .and_then(Value::as_str)
                .and_then(parse_iso8601_duration);
            for track in tracks.iter_mut().filter(|t| t.id == id) {
                track.duration_seconds = seconds;
            }
        }
    }
}
