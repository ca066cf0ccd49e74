//!
//! src/config.rs
//!
//! Environment driven configuration for both catalogs, the http clients,
//! the matcher and the session store
//!

use std::str::FromStr;
use std::time;

use url::Url;

use crate::errors::MigrateError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

/// Constants for Spotify
pub const SPOTIFY_AUTH_URL: &str = "https://accounts.spotify.com/authorize";
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1/";
pub const SPOTIFY_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";
pub const SPOTIFY_SCOPES: [&str; 4] = [
    "playlist-read-private",
    "playlist-modify-private",
    "playlist-modify-public",
    "user-read-email",
];
pub const SEARCH_LIMIT: u32 = 10;
pub const SEARCH_RATE_LIMIT_BACKOFF: u64 = 2000;
pub const SEARCH_RATE_LIMIT_RETRIES: u8 = 1;
pub const PLAYLIST_WRITE_BATCH: usize = 100;

/// Constants for YouTube
pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3/";
pub const YOUTUBE_PAGE_SIZE: u32 = 50;
pub const YOUTUBE_PAGE_DELAY: u64 = 1000;

/// Constants for batch matching
pub const MATCH_BATCH_SIZE: usize = 5;
pub const MATCH_BATCH_DELAY: u64 = 1000;

/// Wrapper over env::var to return an invalid enviroment var error
fn env_check(s: &str) -> Result<String, MigrateError> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(MigrateError::Config(format!("{s} was not set"))),
    }
}

/// Parses an optional variable, falling back to `default` when unset or junk
fn env_or<T: FromStr>(s: &str, default: T) -> T {
    std::env::var(s)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

/// `Url::join` drops the last segment unless the base ends in a slash
fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

fn parse_url(var: &str, default: &str) -> Result<Url, MigrateError> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).map_err(|e| MigrateError::Config(format!("{var} invalid {e}")))
}

/// Configuration that Spotify expects when hitting endpoints
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Url,
    pub auth_url: Url,
    pub token_url: Url,
    pub api_base: Url,
    pub scopes: Vec<String>,
    pub search_limit: u32,
    pub rate_limit_backoff: time::Duration,
    pub rate_limit_retries: u8,
    pub write_batch: usize,
}

fn build_spotify() -> Result<SpotifyConfig, MigrateError> {
    let client_id     = env_check("SPOTIFY_CLIENT_ID")?;
    let client_secret = env_check("SPOTIFY_CLIENT_SECRET")?;

    let redirect_uri = parse_url("SPOTIFY_REDIRECT_URI", SPOTIFY_REDIRECT_URI)?;
    let auth_url     = parse_url("SPOTIFY_AUTH_URL", SPOTIFY_AUTH_URL)?;
    let token_url    = parse_url("SPOTIFY_TOKEN_URL", SPOTIFY_TOKEN_URL)?;
    let mut api_base = parse_url("SPOTIFY_API_BASE", SPOTIFY_API_BASE)?;

    // credentials only ever travel to the accounts service over https
    for url in [&auth_url, &token_url, &api_base] {
        ensure_https(url).map_err(MigrateError::Config)?;
    }
    ensure_host(&auth_url, "accounts.spotify.com").map_err(MigrateError::Config)?;
    ensure_host(&token_url, "accounts.spotify.com").map_err(MigrateError::Config)?;
    ensure_host(&api_base, "api.spotify.com").map_err(MigrateError::Config)?;
    ensure_trailing_slash(&mut api_base);

    Ok( SpotifyConfig {
        client_id,
        client_secret,
        redirect_uri,
        auth_url,
        token_url,
        api_base,
        scopes: SPOTIFY_SCOPES.iter().map(|s| s.to_string()).collect(),
        search_limit: env_or("SEARCH_LIMIT", SEARCH_LIMIT),
        rate_limit_backoff: time::Duration::from_millis(
            env_or("SEARCH_RATE_LIMIT_BACKOFF_MS", SEARCH_RATE_LIMIT_BACKOFF)
        ),
        rate_limit_retries: SEARCH_RATE_LIMIT_RETRIES,
        write_batch: PLAYLIST_WRITE_BATCH,
    })
}

///
/// Configuration for the YouTube Data API (read only, keyed)
///
#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    pub api_key: String,
    pub api_base: Url,
    pub page_size: u32,
    pub page_delay: time::Duration,
}

fn build_youtube() -> Result<YouTubeConfig, MigrateError> {
    let api_key = env_check("YOUTUBE_API_KEY")?;
    let mut api_base = parse_url("YOUTUBE_API_BASE", YOUTUBE_API_BASE)?;

    ensure_https(&api_base).map_err(MigrateError::Config)?;
    ensure_host(&api_base, "www.googleapis.com").map_err(MigrateError::Config)?;
    ensure_trailing_slash(&mut api_base);

    Ok( YouTubeConfig {
        api_key,
        api_base,
        page_size: YOUTUBE_PAGE_SIZE,
        page_delay: time::Duration::from_millis(YOUTUBE_PAGE_DELAY),
    })
}

///
/// Configuration for Http timeouts, pooling, etc.
///
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
        }
    }
}

///
/// Weights used to blend per field similarities into a confidence.
/// There is a single set: when a duration cannot be compared its weight is
/// folded into the title weight (0.6 + 0.1 -> 0.7).
///
#[derive(Debug, Clone, Copy)]
pub struct ScoringConfig {
    pub title_weight: f64,
    pub artist_weight: f64,
    pub duration_weight: f64,
    pub duration_close_secs: u32,   // |delta| under this scores 1.0
    pub duration_near_secs: u32,    // |delta| under this scores 0.8, else 0.5
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            title_weight: 0.6,
            artist_weight: 0.3,
            duration_weight: 0.1,
            duration_close_secs: 15,
            duration_near_secs: 30,
        }
    }
}

///
/// Configuration for fanning matches out against the target catalog
///
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub batch_size: usize,             // concurrency ceiling
    pub batch_delay: time::Duration,   // pacing between batches
    pub scoring: ScoringConfig,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: MATCH_BATCH_SIZE,
            batch_delay: time::Duration::from_millis(MATCH_BATCH_DELAY),
            scoring: ScoringConfig::default(),
        }
    }
}

fn build_matching() -> MatchingConfig {
    let defaults = MatchingConfig::default();
    MatchingConfig {
        batch_size: env_or("MATCH_BATCH_SIZE", defaults.batch_size).max(1),
        batch_delay: time::Duration::from_millis(
            env_or("MATCH_BATCH_DELAY_MS", MATCH_BATCH_DELAY)
        ),
        ..defaults
    }
}

///
/// Configuration for the durable session store
///
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub db_url: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { db_url: "sqlite://./data/session.db".to_string() }
    }
}

///
/// Configuration for Logger
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,playlist_migrator=debug,reqwest=warn,sqlx=warn"
                .to_string(),
            format: LogFormat::Pretty,
            with_ansi: true,
            include_file_line: false,
            include_target: true,
        }
    }
}

fn build_logging() -> LoggingConfig {
    let mut logging = LoggingConfig::default();
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        logging.format = LogFormat::Json;
        logging.with_ansi = false;
        logging.include_file_line = true;
    }
    logging
}

///
/// AppConfig which holds everything the migrator needs
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: SpotifyConfig,
    pub youtube: YouTubeConfig,
    pub http: HttpConfig,
    pub matching: MatchingConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, MigrateError> {
    dotenvy::dotenv().ok();

    let spotify     = build_spotify()?;
    let youtube     = build_youtube()?;
    let http        = HttpConfig::default();
    let matching    = build_matching();
    let persistence = PersistenceConfig {
        db_url: std::env::var("MIGRATOR_DB_URL")
            .unwrap_or_else(|_| PersistenceConfig::default().db_url),
    };
    let logging     = build_logging();

    Ok( AppConfig { spotify, youtube, http, matching, persistence, logging } )
}
