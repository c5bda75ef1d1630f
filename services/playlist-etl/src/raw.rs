//!
//! src/raw.rs  Andrew Belles  Oct 19th, 2026
//!
//! Staging area for raw playlist pages. Pages land under the unprocessed
//! prefix, are only ever added (never rewritten) and leave it once by
//! promotion to the processed prefix
//!

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::{RawCompression, StorageConfig};
use crate::errors::EtlError;
use crate::store::SharedStore;

const JSON_SUFFIX: &str = ".json";
const ZSTD_SUFFIX: &str = ".json.zst";

/// Location of one staged raw page in the store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawHandle {
    pub key: String
}

/// One fetched page plus where it was read from
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub source_location: String,
    pub body: Value
}

pub struct RawRecordStore {
    store: SharedStore,
    unprocessed_prefix: String,
    processed_prefix: String,
    compression: RawCompression,
    level: i32
}

impl RawRecordStore {
    pub fn new(store: SharedStore, cfg: &StorageConfig) -> Self {
        Self {
            store,
            unprocessed_prefix: cfg.unprocessed_prefix.clone(),
            processed_prefix: cfg.processed_prefix.clone(),
            compression: cfg.raw_compression,
            level: cfg.zstd_level.clamp(0, 21)
        }
    }

    pub fn unprocessed_prefix(&self) -> &str {
        &self.unprocessed_prefix
    }

    pub fn processed_prefix(&self) -> &str {
        &self.processed_prefix
    }

    /// spotify_raw_<YYYYmmddHHMMSS>.json, later pages of the same fetch get
    /// a _p<n> suffix so a multi page fetch never collides with itself
    pub fn file_name(&self, fetched_at: DateTime<Utc>, page: usize) -> String {
        let stamp = fetched_at.format("%Y%m%d%H%M%S");
        let suffix = match self.compression {
            RawCompression::None => JSON_SUFFIX,
            RawCompression::Zstd => ZSTD_SUFFIX,
        };
        if page == 0 {
            format!("spotify_raw_{stamp}{suffix}")
        } else {
            format!("spotify_raw_{stamp}_p{page}{suffix}")
        }
    }

    /// Stages one page under the unprocessed prefix. Refuses a name that is
    /// already staged or already promoted, promotion would otherwise land
    /// on the older page
    pub async fn stage(
        &self,
        page_body: &Value,
        fetched_at: DateTime<Utc>,
        page: usize
    ) -> Result<RawHandle, EtlError> {
        let name = self.file_name(fetched_at, page);
        let key = format!("{}{name}", self.unprocessed_prefix);
        if self.store.exists(&key).await? {
            return Err(EtlError::Storage(format!("raw payload already staged: {key}")));
        }
        let processed = format!("{}{name}", self.processed_prefix);
        if self.store.exists(&processed).await? {
            return Err(EtlError::Storage(format!("raw payload already processed: {processed}")));
        }

        let json = serde_json::to_vec(page_body)?;
        let bytes = match self.compression {
            RawCompression::None => json,
            RawCompression::Zstd => zstd::stream::encode_all(json.as_slice(), self.level)
                .map_err(|e| EtlError::Storage(format!("zstd encode {key}: {e}")))?,
        };

        self.store.write(&key, bytes).await?;
        tracing::debug!(key = %key, "raw.staged");
        Ok( RawHandle { key } )
    }

    /// Every raw page waiting under the unprocessed prefix, sorted by key
    pub async fn list_unprocessed(&self) -> Result<Vec<RawHandle>, EtlError> {
        let keys = self.store.list(&self.unprocessed_prefix).await?;
        Ok(keys.into_iter()
            .filter(|k| Self::is_raw_key(k))
            .map(|key| RawHandle { key })
            .collect())
    }

    fn is_raw_key(key: &str) -> bool {
        key.ends_with(JSON_SUFFIX) || key.ends_with(ZSTD_SUFFIX)
    }

    /// Reads and decodes one staged page. Undecodable bytes are reported
    /// against the page's location
    pub async fn read(&self, handle: &RawHandle) -> Result<RawPayload, EtlError> {
        let bytes = self.store.read(&handle.key).await?;
        let malformed = |reason: String| EtlError::MalformedPayload {
            source_location: handle.key.clone(),
            reason
        };

        let json = if handle.key.ends_with(ZSTD_SUFFIX) {
            zstd::stream::decode_all(bytes.as_slice())
                .map_err(|e| malformed(format!("zstd decode: {e}")))?
        } else {
            bytes
        };

        let body = serde_json::from_slice(&json)
            .map_err(|e| malformed(format!("invalid json: {e}")))?;
        Ok( RawPayload { source_location: handle.key.clone(), body } )
    }

    pub async fn read_all(&self, handles: &[RawHandle]) -> Result<Vec<RawPayload>, EtlError> {
        let mut payloads = Vec::with_capacity(handles.len());
        for handle in handles {
            payloads.push(self.read(handle).await?);
        }
        Ok(payloads)
    }
}
