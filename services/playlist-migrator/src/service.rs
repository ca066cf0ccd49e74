//!
//! src/service.rs
//!
//! Single entry point the cli talks to. Owns one instance of every
//! component, all sharing the same session and token manager
//!

use std::sync::Arc;

use tracing::info;
use url::Url;

use crate::auth::TokenManager;
use crate::catalog::SpotifyCatalog;
use crate::config::AppConfig;
use crate::errors::MigrateError;
use crate::fetch::{SpotifyClient, YouTubeClient};
use crate::matcher::Matcher;
use crate::orchestrator::BatchOrchestrator;
use crate::persistent::Session;
use crate::source::{self, YouTubeCatalog};
use crate::types::{MatchResult, MigrationResult, SourcePlaylist, SourceTrack};
use crate::writer::PlaylistWriter;

const DEFAULT_DESCRIPTION: &str = "Migrated from YouTube";

/// What a full run produced, including how much of the source made it across
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub source_tracks: usize,
    pub result: MigrationResult,
}

/// A fetched and matched playlist that has not been written yet
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub playlist: SourcePlaylist,
    pub matches: Vec<MatchResult>,
}

pub struct Migrator {
    tokens: Arc<TokenManager>,
    youtube: YouTubeCatalog,
    orchestrator: BatchOrchestrator,
    writer: PlaylistWriter,
}

impl Migrator {
    pub fn new(cfg: &AppConfig, session: Session) -> Result<Self, MigrateError> {
        let spotify = Arc::new(SpotifyClient::new(&cfg.http, &cfg.spotify)?);
        let youtube = YouTubeCatalog::new(YouTubeClient::new(&cfg.http, &cfg.youtube)?);

        let tokens  = Arc::new(TokenManager::new(spotify.clone(), session));
        let catalog = Arc::new(SpotifyCatalog::new(spotify.clone(), tokens.clone()));
        let matcher = Arc::new(Matcher::new(catalog, cfg.matching.scoring));
        let orchestrator = BatchOrchestrator::new(matcher, cfg.matching.clone());
        let writer  = PlaylistWriter::new(spotify, tokens.clone());

        Ok( Self { tokens, youtube, orchestrator, writer } )
    }

    pub fn extract_playlist_id(&self, url: &str) -> Option<String> {
        source::extract_playlist_id(url)
    }

    pub async fn fetch_playlist(&self, playlist_id: &str) ->
        Result<SourcePlaylist, MigrateError> {
        self.youtube.fetch_playlist(playlist_id).await
    }

    pub async fn match_all(&self, tracks: &[SourceTrack]) -> Vec<MatchResult> {
        self.orchestrator.match_all(tracks).await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated().await
    }

    pub async fn build_authorization_url(&self) -> Result<Url, MigrateError> {
        self.tokens.build_authorization_url().await
    }

    pub async fn complete_authorization(&self, code: &str, state: &str) -> bool {
        self.tokens.complete_authorization(code, state).await
    }

    /// Accepts the full url the browser landed on after consent
    pub async fn complete_authorization_from_redirect(&self, redirect: &str) ->
        Result<bool, MigrateError> {
        let url = Url::parse(redirect.trim())
            .map_err(|e| MigrateError::InvalidInput(format!("redirect url: {e}")))?;
        let param = |name: &str| url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty());

        if let Some(error) = param("error") {
            return Err(MigrateError::InvalidInput(format!("authorization denied: {error}")));
        }
        let code  = param("code")
            .ok_or_else(|| MigrateError::InvalidInput("redirect url has no code".into()))?;
        let state = param("state")
            .ok_or_else(|| MigrateError::InvalidInput("redirect url has no state".into()))?;

        Ok(self.complete_authorization(&code, &state).await)
    }

    pub async fn create_playlist(
        &self,
        title: &str,
        description: &str,
        matches: &[MatchResult]
    ) -> Result<MigrationResult, MigrateError> {
        self.writer.create_playlist(title, description, matches).await
    }

    /// url -> fetch -> match, nothing is written
    pub async fn plan(&self, url: &str) -> Result<MigrationPlan, MigrateError> {
        let playlist_id = self.extract_playlist_id(url)
            .ok_or_else(|| MigrateError::InvalidInput(format!("not a playlist url: {url}")))?;
        if !self.is_authenticated().await {
            // an expired access token is fine as long as a refresh works
            self.tokens.get_valid_access_token().await?;
        }

        let playlist = self.fetch_playlist(&playlist_id).await?;
        info!(playlist = %playlist_id, tracks = playlist.tracks.len(), "migrate.fetched");

        let matches = self.match_all(&playlist.tracks).await;
        Ok(MigrationPlan { playlist, matches })
    }

    /// Writes a plan out. Title and description default to the source
    /// playlist's own
    pub async fn execute(
        &self,
        plan: &MigrationPlan,
        title: Option<&str>,
        description: Option<&str>
    ) -> Result<MigrationReport, MigrateError> {
        let playlist = &plan.playlist;
        let title = title.unwrap_or(playlist.title.as_str());
        let description = description
            .or(playlist.description.as_deref())
            .unwrap_or(DEFAULT_DESCRIPTION);
        let result = self.create_playlist(title, description, &plan.matches).await?;

        info!(
            source = playlist.tracks.len(), matched = result.track_count,
            url = %result.url, "migrate.done"
        );
        Ok(MigrationReport { source_tracks: playlist.tracks.len(), result })
    }

    /// url -> fetch -> match -> write
    pub async fn migrate(
        &self,
        url: &str,
        title: Option<&str>,
        description: Option<&str>
    ) -> Result<MigrationReport, MigrateError> {
        let plan = self.plan(url).await?;
        self.execute(&plan, title, description).await
    }

    pub async fn logout(&self) -> Result<(), MigrateError> {
        self.tokens.logout().await
    }
}
