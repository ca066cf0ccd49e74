//!
//! src/catalog.rs
//!
//! Target catalog search. A failed search degrades to "no candidates" so a
//! single bad query never takes the batch down with it
//!

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::auth::TokenManager;
use crate::errors::MigrateError;
use crate::fetch::SpotifyClient;
use crate::types::CandidateTrack;

/// Seam between the matcher and whatever catalog it searches
#[async_trait]
pub trait TrackSearch: Send + Sync {
    /// Ranked candidates for `query`. Errors are reserved for failures the
    /// caller must see per track (no usable token); upstream trouble is empty
    async fn search(&self, query: &str) -> Result<Vec<CandidateTrack>, MigrateError>;
}

pub struct SpotifyCatalog {
    client: Arc<SpotifyClient>,
    tokens: Arc<TokenManager>,
}

impl SpotifyCatalog {
    pub fn new(client: Arc<SpotifyClient>, tokens: Arc<TokenManager>) -> Self {
        Self { client, tokens }
    }

    async fn search_with_retry(&self, query: &str, bearer: &str) ->
        Result<Value, MigrateError> {
        let cfg = &self.client.cfg;
        let mut attempt = 0_u8;
        loop {
            let response = self.client.search(query, cfg.search_limit, bearer)?
                .send()
                .await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response.json::<Value>().await?);
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= cfg.rate_limit_retries {
                    return Err(MigrateError::RateLimited(
                        format!("search still limited after {attempt} retries")
                    ));
                }
                attempt += 1;
                warn!(
                    query = %query, attempt,
                    backoff_ms = cfg.rate_limit_backoff.as_millis() as u64,
                    "search.rate_limited"
                );
                sleep(cfg.rate_limit_backoff).await;
                continue;
            }
            return Err(MigrateError::UpstreamUnavailable {
                service: "spotify search",
                status: status.as_u16()
            });
        }
    }
}

#[async_trait]
impl TrackSearch for SpotifyCatalog {
    async fn search(&self, query: &str) -> Result<Vec<CandidateTrack>, MigrateError> {
        let bearer = self.tokens.get_valid_access_token().await?;

        let body = match self.search_with_retry(query, &bearer).await {
            Ok(body) => body,
            Err(e) => {
                warn!(query = %query, error = %e, "search.degraded");
                return Ok(Vec::new());
            }
        };

        let candidates = parse_search(&body);
        debug!(query = %query, hits = candidates.len(), "search.done");
        Ok(candidates)
    }
}

/// Maps a `/v1/search?type=track` body; items missing an id or uri are skipped
fn parse_search(body: &Value) -> Vec<CandidateTrack> {
    let Some(items) = body.pointer("/tracks/items").and_then(Value::as_array) else {
        return Vec::new();
    };

    items.iter().filter_map(|item| {
        let id  = item.get("id")?.as_str()?.to_string();
        let uri = item.get("uri")?.as_str()?.to_string();
        let title = item.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        let artists = item.get("artists")
            .and_then(Value::as_array)
            .map(|arr| arr.iter()
                .filter_map(|a| a.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect())
            .unwrap_or_default();
        let album = item.pointer("/album/name").and_then(Value::as_str).map(str::to_string);
        let thumbnail = item.pointer("/album/images/0/url")
            .and_then(Value::as_str)
            .map(str::to_string);
        let duration_ms = item.get("duration_ms").and_then(Value::as_u64).unwrap_or(0);

        Some(CandidateTrack {
            id,
            title,
            artists,
            album,
            duration_seconds: ((duration_ms + 500) / 1000) as u32,
            uri,
            thumbnail,
        })
    }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::fetch::test_support::spotify_config;
    use crate::persistent::Session;
    use crate::types::Credential;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn catalog(server: &MockServer) -> SpotifyCatalog {
        let client = Arc::new(SpotifyClient::new(
            &HttpConfig::default(), &spotify_config(&server.uri())).unwrap());
        let session = Session::in_memory();
        session.save_credential(&Credential {
            access_token: "tok".into(),
            refresh_token: "ref".into(),
            expires_at_ms: chrono::Utc::now().timestamp_millis() + 60_000,
        }).await.unwrap();
        let tokens = Arc::new(TokenManager::new(client.clone(), session));
        SpotifyCatalog::new(client, tokens)
    }

    fn search_body() -> Value {
        json!({
            "tracks": {
                "items": [
                    {
                        "id": "7tFiyTwD0nx5a1eklYtX2J",
                        "name": "Bohemian Rhapsody - Remastered 2011",
                        "uri": "spotify:track:7tFiyTwD0nx5a1eklYtX2J",
                        "duration_ms": 354_947,
                        "artists": [{"name": "Queen"}],
                        "album": {
                            "name": "A Night At The Opera",
                            "images": [{"url": "https://i.scdn.co/image/cover"}]
                        }
                    },
                    {
                        "id": "live",
                        "name": "Bohemian Rhapsody - Live Aid",
                        "uri": "spotify:track:live",
                        "duration_ms": 150_000,
                        "artists": [{"name": "Queen"}, {"name": "Freddie Mercury"}],
                        "album": {"name": "Live Aid", "images": []}
                    },
                    { "name": "no id or uri" }
                ]
            }
        })
    }

    #[tokio::test]
    async fn search_maps_candidates_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .and(query_param("type", "track"))
            .and(query_param("q", "Queen Bohemian Rhapsody"))
            .and(query_param("limit", "10"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
            .expect(1)
            .mount(&server)
            .await;

        let hits = catalog(&server).await.search("Queen Bohemian Rhapsody").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "7tFiyTwD0nx5a1eklYtX2J");
        assert_eq!(hits[0].duration_seconds, 355);
        assert_eq!(hits[0].album.as_deref(), Some("A Night At The Opera"));
        assert_eq!(hits[0].thumbnail.as_deref(), Some("https://i.scdn.co/image/cover"));
        assert_eq!(hits[1].artist_line(), "Queen, Freddie Mercury");
        assert!(hits[1].thumbnail.is_none());
    }

    #[tokio::test]
    async fn rate_limit_is_retried_exactly_once_then_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let hits = catalog(&server).await.search("anything").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_then_success_returns_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET")).and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
            .expect(1)
            .mount(&server)
            .await;

        let hits = catalog(&server).await.search("queen").await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn server_error_degrades_to_empty_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let hits = catalog(&server).await.search("queen").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn missing_session_surfaces_as_error() {
        let server = MockServer::start().await;
        let client = Arc::new(SpotifyClient::new(
            &HttpConfig::default(), &spotify_config(&server.uri())).unwrap());
        let tokens = Arc::new(TokenManager::new(client.clone(), Session::in_memory()));
        let catalog = SpotifyCatalog::new(client, tokens);

        assert!(matches!(catalog.search("queen").await, Err(MigrateError::Unauthenticated)));
    }

    #[test]
    fn parse_search_tolerates_missing_tracks_key() {
        assert!(parse_search(&json!({"error": "nope"})).is_empty());
    }
}
