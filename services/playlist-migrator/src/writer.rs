//!
//! src/writer.rs
//!
//! Materializes matches as a new private playlist. Appends go out strictly
//! in order, one batch at a time. A failed append is terminal and the
//! partially written playlist is left in place on spotify
//!

use std::sync::Arc;

use reqwest::RequestBuilder;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::TokenManager;
use crate::errors::MigrateError;
use crate::fetch::SpotifyClient;
use crate::types::{MatchResult, MigrationResult, Tier, TierCounts};

/// Aggregate numbers reported back after a migration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationStats {
    pub track_count: usize,
    pub average_confidence: u8,
    pub tiers: TierCounts,
}

impl MigrationStats {
    pub fn from_matches(matches: &[MatchResult]) -> Self {
        let mut tiers = TierCounts::default();
        let mut sum = 0_u64;
        for m in matches {
            sum += m.confidence as u64;
            match m.tier {
                Tier::High => tiers.high += 1,
                Tier::Medium => tiers.medium += 1,
                Tier::Low => tiers.low += 1,
            }
        }
        let average_confidence = if matches.is_empty() {
            0
        } else {
            (sum as f64 / matches.len() as f64).round() as u8
        };
        Self { track_count: matches.len(), average_confidence, tiers }
    }
}

pub struct PlaylistWriter {
    client: Arc<SpotifyClient>,
    tokens: Arc<TokenManager>,
}

impl PlaylistWriter {
    pub fn new(client: Arc<SpotifyClient>, tokens: Arc<TokenManager>) -> Self {
        Self { client, tokens }
    }

    async fn send(&self, request: RequestBuilder, what: &'static str) ->
        Result<reqwest::Response, MigrateError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, step = what, "playlist.request.failed");
            return Err(MigrateError::UpstreamUnavailable {
                service: what,
                status: status.as_u16()
            });
        }
        Ok(response)
    }

    async fn send_json(&self, request: RequestBuilder, what: &'static str) ->
        Result<Value, MigrateError> {
        Ok(self.send(request, what).await?.json::<Value>().await?)
    }

    pub async fn create_playlist(
        &self,
        title: &str,
        description: &str,
        matches: &[MatchResult]
    ) -> Result<MigrationResult, MigrateError> {
        let bearer = self.tokens.get_valid_access_token().await?;

        let me = self.send_json(self.client.me(&bearer)?, "spotify me").await?;
        let user_id = me.get("id").and_then(Value::as_str)
            .ok_or_else(|| MigrateError::Parse("me response missing id".to_string()))?;

        let created = self.send_json(
            self.client.create_playlist(user_id, title, description, &bearer)?,
            "spotify create playlist"
        ).await?;
        let playlist_id = created.get("id").and_then(Value::as_str)
            .ok_or_else(|| MigrateError::Parse("playlist response missing id".to_string()))?
            .to_string();
        let url = created.pointer("/external_urls/spotify")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://open.spotify.com/playlist/{playlist_id}"));
        info!(playlist = %playlist_id, user = %user_id, "playlist.created");

        let uris: Vec<&str> = matches.iter().map(|m| m.candidate.uri.as_str()).collect();
        let mut written = 0_usize;
        for (index, batch) in uris.chunks(self.client.cfg.write_batch.max(1)).enumerate() {
            // token may expire during a long write
            let bearer = self.tokens.get_valid_access_token().await?;
            let request = self.client.add_tracks(&playlist_id, batch, &bearer)?;
            if let Err(e) = self.send(request, "spotify add tracks").await {
                warn!(
                    playlist = %playlist_id, written, remaining = uris.len() - written,
                    "playlist.partial"
                );
                return Err(e);
            }
            written += batch.len();
            debug!(playlist = %playlist_id, batch = index, written, "playlist.append");
        }

        let stats = MigrationStats::from_matches(matches);
        info!(
            playlist = %playlist_id, tracks = stats.track_count,
            average = stats.average_confidence, "playlist.done"
        );
        Ok(MigrationResult {
            playlist_id,
            title: title.to_string(),
            track_count: stats.track_count,
            average_confidence: stats.average_confidence,
            tiers: stats.tiers,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::fetch::test_support::spotify_config;
    use crate::persistent::Session;
    use crate::types::{CandidateTrack, Credential, SourceTrack};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn matched(n: usize, confidence: u8) -> MatchResult {
        MatchResult::new(
            SourceTrack {
                id: format!("yt{n}"),
                title: format!("Song {n}"),
                artist: "Artist".into(),
                duration_seconds: None,
                thumbnail: None,
            },
            CandidateTrack {
                id: format!("sp{n}"),
                title: format!("Song {n}"),
                artists: vec!["Artist".into()],
                album: None,
                duration_seconds: 200,
                uri: format!("spotify:track:sp{n}"),
                thumbnail: None,
            },
            confidence,
        )
    }

    async fn writer(server: &MockServer, logged_in: bool) -> PlaylistWriter {
        let client = Arc::new(SpotifyClient::new(
            &HttpConfig::default(), &spotify_config(&server.uri())).unwrap());
        let session = Session::in_memory();
        if logged_in {
            session.save_credential(&Credential {
                access_token: "tok".into(),
                refresh_token: "ref".into(),
                expires_at_ms: chrono::Utc::now().timestamp_millis() + 60_000,
            }).await.unwrap();
        }
        let tokens = Arc::new(TokenManager::new(client.clone(), session));
        PlaylistWriter::new(client, tokens)
    }

    async fn mount_me_and_create(server: &MockServer) {
        Mock::given(method("GET")).and(path("/v1/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "user1"})))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/users/user1/playlists"))
            .and(body_partial_json(json!({"name": "Road Trip", "public": false})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pl1",
                "external_urls": {"spotify": "https://open.spotify.com/playlist/pl1"}
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn stats_for_empty_matches_are_zero() {
        let stats = MigrationStats::from_matches(&[]);
        assert_eq!(stats.track_count, 0);
        assert_eq!(stats.average_confidence, 0);
        assert_eq!(stats.tiers, TierCounts::default());
    }

    #[test]
    fn stats_count_tiers_and_round_mean() {
        let matches = vec![matched(1, 95), matched(2, 80), matched(3, 40), matched(4, 90)];
        let stats = MigrationStats::from_matches(&matches);
        assert_eq!(stats.tiers, TierCounts { high: 2, medium: 1, low: 1 });
        // 305 / 4 = 76.25
        assert_eq!(stats.average_confidence, 76);
    }

    #[tokio::test]
    async fn writes_in_ordered_batches_of_one_hundred() {
        let server = MockServer::start().await;
        mount_me_and_create(&server).await;

        let matches: Vec<_> = (0..250).map(|n| matched(n, 92)).collect();
        let first: Vec<String> = (0..100).map(|n| format!("spotify:track:sp{n}")).collect();
        let second: Vec<String> = (100..200).map(|n| format!("spotify:track:sp{n}")).collect();
        let third: Vec<String> = (200..250).map(|n| format!("spotify:track:sp{n}")).collect();
        for batch in [first, second, third] {
            Mock::given(method("POST"))
                .and(path("/v1/playlists/pl1/tracks"))
                .and(body_partial_json(json!({"uris": batch})))
                .respond_with(ResponseTemplate::new(201)
                    .set_body_json(json!({"snapshot_id": "s"})))
                .expect(1)
                .mount(&server)
                .await;
        }

        let result = writer(&server, true).await
            .create_playlist("Road Trip", "from youtube", &matches)
            .await
            .unwrap();
        assert_eq!(result.playlist_id, "pl1");
        assert_eq!(result.track_count, 250);
        assert_eq!(result.average_confidence, 92);
        assert_eq!(result.tiers.high, 250);
        assert_eq!(result.url, "https://open.spotify.com/playlist/pl1");

        // batches land in playlist order, one request each
        let appends: Vec<Value> = server.received_requests().await.unwrap()
            .into_iter()
            .filter(|r| r.url.path() == "/v1/playlists/pl1/tracks")
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect();
        let shape: Vec<(usize, &str)> = appends.iter()
            .map(|body| {
                let uris = body["uris"].as_array().unwrap();
                (uris.len(), uris[0].as_str().unwrap())
            })
            .collect();
        assert_eq!(shape, vec![
            (100, "spotify:track:sp0"),
            (100, "spotify:track:sp100"),
            (50, "spotify:track:sp200"),
        ]);
    }

    #[tokio::test]
    async fn empty_matches_create_an_empty_playlist() {
        let server = MockServer::start().await;
        mount_me_and_create(&server).await;
        Mock::given(method("POST")).and(path("/v1/playlists/pl1/tracks"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let result = writer(&server, true).await
            .create_playlist("Road Trip", "", &[])
            .await
            .unwrap();
        assert_eq!(result.track_count, 0);
        assert_eq!(result.average_confidence, 0);
    }

    #[tokio::test]
    async fn failed_batch_aborts_remaining_writes() {
        let server = MockServer::start().await;
        mount_me_and_create(&server).await;
        Mock::given(method("POST")).and(path("/v1/playlists/pl1/tracks"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;

        let matches: Vec<_> = (0..150).map(|n| matched(n, 75)).collect();
        let err = writer(&server, true).await
            .create_playlist("Road Trip", "", &matches)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::UpstreamUnavailable { status: 502, .. }));
    }

    #[tokio::test]
    async fn logged_out_writer_is_unauthenticated() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/v1/me"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = writer(&server, false).await
            .create_playlist("Road Trip", "", &[matched(1, 99)])
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Unauthenticated));
    }
}
