//!
//! src/config.rs  Andrew Belles  Oct 19th, 2026
//!
//! Builds the single AppConfig the etl runs with. Everything is read once
//! at program start and handed to the fetch and storage collaborators,
//! transforms never touch the environment
//!

use url::Url;
use std::time;
use crate::errors::EtlError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const RETRY_MAX_ATTEMPTS: u8 = 4;
pub const RETRY_BASE_BACKOFF: u64 = 250;
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Top 50 - Global
pub const DEFAULT_PLAYLIST: &str = "37i9dQZEVXbMDoHDwVN2tF";
pub const SPOTIFY_MAX_PAGE_LIMIT: u32 = 100;

///
/// Source of credentials. Only the fetch side asks for secrets
///
pub trait SecretProvider {
    fn get(&self, name: &str) -> Result<String, EtlError>;
}

/// Reads secrets from the process environment (.env is loaded beforehand)
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretProvider for EnvSecrets {
    fn get(&self, name: &str) -> Result<String, EtlError> {
        match std::env::var(name) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(EtlError::Config(format!("{name} was not set"))),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_to_uint(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
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

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

/// Prefixes are compared as plain strings against object keys, so they
/// always end in exactly one '/'
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Configuration that Spotify expects when hitting endpoints
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,
    pub api_base: Url,
}

fn build_spotify(secrets: &impl SecretProvider) -> Result<SpotifyConfig, EtlError> {
    let client_id     = secrets.get("SPOTIFY_CLIENT_ID")?;
    let client_secret = secrets.get("SPOTIFY_CLIENT_SECRET")?;

    let token_url = env_or("SPOTIFY_TOKEN_URL", "https://accounts.spotify.com/api/token");
    let api_base  = env_or("SPOTIFY_API_BASE", "https://api.spotify.com/v1/");

    let token_url = Url::parse(&token_url)
        .map_err(|e| EtlError::Config(format!("SPOTIFY_TOKEN_URL invalid {e}")))?;
    let mut api_base = Url::parse(&api_base)
        .map_err(|e| EtlError::Config(format!("SPOTIFY_API_BASE invalid {e}")))?;

    // ensure valid https and hostname for both urls
    ensure_https(&token_url).map_err(EtlError::Config)?;
    ensure_https(&api_base).map_err(EtlError::Config)?;
    ensure_host(&token_url, "accounts.spotify.com").map_err(EtlError::Config)?;
    ensure_host(&api_base, "api.spotify.com").map_err(EtlError::Config)?;
    ensure_trailing_slash(&mut api_base);

    Ok( SpotifyConfig { client_id, client_secret, token_url, api_base } )
}

///
/// Which playlist to pull and how many pages of it
///
#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    pub playlist_id: String,
    pub page_limit: u32,
    pub max_pages: u32,
}

/// Accepts a bare id, a spotify:playlist:<id> uri or an open.spotify.com link
pub fn parse_playlist_id(raw: &str) -> Result<String, EtlError> {
    let raw = raw.trim();
    if let Some(id) = raw.strip_prefix("spotify:playlist:") {
        return validate_playlist_id(id);
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        let url = Url::parse(raw)?;
        let mut segments = url.path_segments()
            .ok_or_else(|| EtlError::Config(format!("playlist link has no path: {raw}")))?;
        let id = segments
            .find(|s| *s == "playlist")
            .and_then(|_| segments.next())
            .ok_or_else(|| EtlError::Config(format!("not a playlist link: {raw}")))?;
        return validate_playlist_id(id);
    }
    validate_playlist_id(raw)
}

fn validate_playlist_id(id: &str) -> Result<String, EtlError> {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(id.to_string())
    } else {
        Err(EtlError::Config(format!("invalid playlist id: {id:?}")))
    }
}

fn build_playlist() -> Result<PlaylistConfig, EtlError> {
    let playlist_id = parse_playlist_id(&env_or("SPOTIFY_PLAYLIST", DEFAULT_PLAYLIST))?;
    let page_limit  = env_to_uint("SPOTIFY_PAGE_LIMIT", SPOTIFY_MAX_PAGE_LIMIT)
        .clamp(1, SPOTIFY_MAX_PAGE_LIMIT);
    let max_pages   = env_to_uint("SPOTIFY_MAX_PAGES", 1).max(1);

    Ok( PlaylistConfig { playlist_id, page_limit, max_pages } )
}

///
/// Configuration for the object store the raw payloads and tables live in
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawCompression {
    None,
    Zstd
}

impl RawCompression {
    pub fn parse(s: &str) -> Option<RawCompression> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Some(RawCompression::None),
            "zstd"      => Some(RawCompression::Zstd),
            _ => None
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root: String,
    pub unprocessed_prefix: String,
    pub processed_prefix: String,
    pub transformed_prefix: String,
    pub raw_compression: RawCompression,
    pub zstd_level: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "./data/bucket".to_string(),
            unprocessed_prefix: "raw_data/to_processed/".to_string(),
            processed_prefix: "raw_data/processed/".to_string(),
            transformed_prefix: "transformed_data/".to_string(),
            raw_compression: RawCompression::None,
            zstd_level: 3,
        }
    }
}

fn build_storage() -> Result<StorageConfig, EtlError> {
    let defaults = StorageConfig::default();

    let unprocessed_prefix = normalize_prefix(
        &env_or("ETL_RAW_UNPROCESSED_PREFIX", &defaults.unprocessed_prefix));
    let processed_prefix = normalize_prefix(
        &env_or("ETL_RAW_PROCESSED_PREFIX", &defaults.processed_prefix));
    let transformed_prefix = normalize_prefix(
        &env_or("ETL_TRANSFORMED_PREFIX", &defaults.transformed_prefix));

    if unprocessed_prefix.is_empty() || unprocessed_prefix == processed_prefix {
        return Err(EtlError::Config(format!(
            "raw prefixes must be non-empty and distinct \
             (unprocessed={unprocessed_prefix:?}, processed={processed_prefix:?})"
        )));
    }
    if processed_prefix.starts_with(&unprocessed_prefix) {
        return Err(EtlError::Config(
            "processed prefix may not live under the unprocessed prefix".to_string()
        ));
    }

    let compression = env_or("ETL_RAW_COMPRESSION", "none");
    let raw_compression = RawCompression::parse(&compression)
        .ok_or_else(|| EtlError::Config(
            format!("ETL_RAW_COMPRESSION must be none|zstd, got {compression}")
        ))?;

    Ok( StorageConfig {
        root: env_or("ETL_STORE_ROOT", &defaults.root),
        unprocessed_prefix,
        processed_prefix,
        transformed_prefix,
        raw_compression,
        zstd_level: defaults.zstd_level,
    })
}

///
/// Configuration for Http timeouts, retries, etc.
///
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u8,
    pub base_backoff: time::Duration,
    pub retryable_statuses: Vec<u16>
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_backoff: time::Duration::from_millis(RETRY_BASE_BACKOFF),
            retryable_statuses: RETRYABLE_STATUSES.to_vec()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
    pub retry: RetryConfig
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
            retry: RetryConfig::default()
        }
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
            filter_directives: "info,playlist_etl=debug,reqwest=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: true,
            include_file_line: true,
            include_target: true,
        }
    }
}

fn build_logging() -> LoggingConfig {
    let mut logging = LoggingConfig::default();
    if env_or("LOG_FORMAT", "json").eq_ignore_ascii_case("pretty") {
        logging.format = LogFormat::Pretty;
    }
    logging
}

///
/// AppConfig which holds everything the collaborators need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: SpotifyConfig,
    pub playlist: PlaylistConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, EtlError> {
    dotenvy::dotenv().ok();
    load_config_with(&EnvSecrets)
}

pub fn load_config_with(secrets: &impl SecretProvider) -> Result<AppConfig, EtlError> {
    let spotify  = build_spotify(secrets)?;
    let playlist = build_playlist()?;
    let storage  = build_storage()?;
    let http     = HttpConfig::default();
    let logging  = build_logging();

    Ok( AppConfig { spotify, playlist, storage, http, logging } )
}
