//!
//! src/fetch.rs
//!
//! Defines methods for hitting specified endpoints. Everything here only
//! builds requests; status handling and parsing belong to the callers
//!

use reqwest::{Client, header, redirect, RequestBuilder};
use serde_json::json;
use url::Url;

use crate::config::{HttpConfig, SpotifyConfig, YouTubeConfig};
use crate::errors::MigrateError;

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder  {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

fn client_with_headers(http: &HttpConfig, headers: header::HeaderMap) ->
    Result<Client, MigrateError> {
    client_helper(http)
        .default_headers(headers)
        .build()
        .map_err(|e| MigrateError::Http(format!("build client: {e}")))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, MigrateError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_with_headers(http, h)
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, MigrateError> {

        let http = base_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone()
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, MigrateError> {
        Ok(self.cfg.api_base.join(path)?)
    }

    /// GET accounts.spotify.com/authorize?client_id=&response_type=code&...
    pub fn authorize_url(&self, state: &str) -> Url {
        let mut url = self.cfg.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.cfg.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.cfg.redirect_uri.as_str())
            .append_pair("state", state)
            .append_pair("scope", &self.cfg.scopes.join(" "));
        url
    }

    fn token_request(&self) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
    }

    /// POST /api/token grant_type=authorization_code
    pub fn exchange_code(&self, code: &str) -> RequestBuilder {
        self.token_request().form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.cfg.redirect_uri.as_str()),
        ])
    }

    /// POST /api/token grant_type=refresh_token
    pub fn refresh(&self, refresh_token: &str) -> RequestBuilder {
        self.token_request().form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
    }

    /// GET /v1/search?type=track&q=...&limit=
    pub fn search(&self, query: &str, limit: u32, bearer: &str) ->
        Result<RequestBuilder, MigrateError> {
        let url = self.endpoint("search")?;
        Ok(self.http.get(url).bearer_auth(bearer).query(&[
            ("type", "track"),
            ("q", query),
            ("limit", &limit.to_string()),
        ]))
    }

    /// GET /v1/me
    pub fn me(&self, bearer: &str) -> Result<RequestBuilder, MigrateError> {
        Ok(self.http.get(self.endpoint("me")?).bearer_auth(bearer))
    }

    /// POST /v1/users/{user_id}/playlists
    pub fn create_playlist(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
        bearer: &str
    ) -> Result<RequestBuilder, MigrateError> {
        let url = self.endpoint(&format!("users/{user_id}/playlists"))?;
        Ok(self.http.post(url).bearer_auth(bearer).json(&json!({
            "name": name,
            "description": description,
            "public": false,
        })))
    }

    /// POST /v1/playlists/{playlist_id}/tracks
    pub fn add_tracks(&self, playlist_id: &str, uris: &[&str], bearer: &str) ->
        Result<RequestBuilder, MigrateError> {
        let url = self.endpoint(&format!("playlists/{playlist_id}/tracks"))?;
        Ok(self.http.post(url).bearer_auth(bearer).json(&json!({ "uris": uris })))
    }
}

#[derive(Clone, Debug)]
pub struct YouTubeClient {
    pub http: Client,
    pub cfg: YouTubeConfig
}

impl YouTubeClient {
    pub fn new(http_config: &HttpConfig, cfg: &YouTubeConfig) ->
        Result<Self, MigrateError> {
        let http = base_client(http_config)?;
        Ok( Self { http, cfg: cfg.clone() })
    }

    fn endpoint(&self, path: &str) -> Result<Url, MigrateError> {
        Ok(self.cfg.api_base.join(path)?)
    }

    /// GET /youtube/v3/playlists?part=snippet,contentDetails&id=...&key=...
    pub fn playlist(&self, playlist_id: &str) -> Result<RequestBuilder, MigrateError> {
        let url = self.endpoint("playlists")?;
        Ok(self.http.get(url).query(&[
            ("part", "snippet,contentDetails"),
            ("id", playlist_id),
            ("key", &self.cfg.api_key),
        ]))
    }

    /// GET /youtube/v3/playlistItems?part=snippet,contentDetails&playlistId=&maxResults=&pageToken=
    pub fn playlist_items(&self, playlist_id: &str, page_token: Option<&str>) ->
        Result<RequestBuilder, MigrateError> {
        let url = self.endpoint("playlistItems")?;
        let rb = self.http.get(url).query(&[
            ("part", "snippet,contentDetails"),
            ("maxResults", &self.cfg.page_size.to_string()),
            ("playlistId", playlist_id),
            ("key", &self.cfg.api_key),
        ]);
        Ok(match page_token {
            Some(token) => rb.query(&[("pageToken", token)]),
            None => rb
        })
    }

    /// GET /youtube/v3/videos?part=contentDetails&id=a,b,c&key=...
    pub fn videos(&self, ids_csv: &str) -> Result<RequestBuilder, MigrateError> {
        let url = self.endpoint("videos")?;
        Ok(self.http.get(url).query(&[
            ("part", "contentDetails"),
            ("id", ids_csv),
            ("key", &self.cfg.api_key),
        ]))
    }
}
