//!
//! src/transform.rs  Andrew Belles  Oct 19th, 2026
//!
//! Reshapes raw playlist items into the album, artist and song tables.
//! Each table is deduplicated on its key, first occurrence wins, so two
//! runs over the same items produce the same rows in the same order
//!

use std::{collections::HashSet, sync::Arc};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::errors::EtlError;
use crate::extract::RawItem;

/// A row of one of the output tables
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: &'static str;
    /// Column order of the written table, matches the field order
    const COLUMNS: &'static [&'static str];

    fn key(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRecord {
    pub album_id: String,
    pub album_name: String,
    pub release_date: String,
    pub total_tracks: u32,
    pub album_url: String
}

impl Record for AlbumRecord {
    const TABLE: &'static str = "album";
    const COLUMNS: &'static [&'static str] =
        &["album_id", "album_name", "release_date", "total_tracks", "album_url"];

    fn key(&self) -> &str { &self.album_id }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRecord {
    pub artist_id: String,
    pub artist_name: String,
    pub external_url: String
}

impl Record for ArtistRecord {
    const TABLE: &'static str = "artist";
    const COLUMNS: &'static [&'static str] = &["artist_id", "artist_name", "external_url"];

    fn key(&self) -> &str { &self.artist_id }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongRecord {
    pub song_id: String,
    pub song_name: String,
    pub song_duration: u64,
    pub song_popularity: u32,
    pub song_url: String,
    pub song_added: String,
    pub album_id: String,
    /// First artist of the track's *album*, not of the track
    pub artist_id: String
}

impl Record for SongRecord {
    const TABLE: &'static str = "song";
    const COLUMNS: &'static [&'static str] = &[
        "song_id", "song_name", "song_duration", "song_popularity",
        "song_url", "song_added", "album_id", "artist_id"
    ];

    fn key(&self) -> &str { &self.song_id }
}

/// Rows of one table for one batch, unique by key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFragment<R> {
    records: Vec<R>
}

impl<R: Record> TableFragment<R> {
    /// Keeps the first record seen for every key
    pub fn from_records(records: impl IntoIterator<Item = R>) -> Self {
        let mut seen = HashSet::new();
        let records = records.into_iter()
            .filter(|r| seen.insert(r.key().to_string()))
            .collect();
        Self { records }
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn album_record(item: &RawItem) -> Result<AlbumRecord, EtlError> {
    let t = AlbumRecord::TABLE;
    Ok( AlbumRecord {
        album_id: item.str_field(t, "track.album.id")?,
        album_name: item.str_field(t, "track.album.name")?,
        release_date: item.str_field(t, "track.album.release_date")?,
        total_tracks: item.u32_field(t, "track.album.total_tracks")?,
        album_url: item.str_field(t, "track.album.external_urls.spotify")?,
    })
}

pub fn album_table(items: &[RawItem]) -> Result<TableFragment<AlbumRecord>, EtlError> {
    let records = items.iter()
        .map(album_record)
        .collect::<Result<Vec<_>, EtlError>>()?;
    Ok(TableFragment::from_records(records))
}

/// Uses the track's own artist list, features included
pub fn artist_table(items: &[RawItem]) -> Result<TableFragment<ArtistRecord>, EtlError> {
    let t = ArtistRecord::TABLE;
    let mut records = Vec::new();
    for item in items {
        let count = item.array_field(t, "track.artists")?.len();
        for i in 0..count {
            records.push(ArtistRecord {
                artist_id: item.str_field(t, &format!("track.artists.{i}.id"))?,
                artist_name: item.str_field(t, &format!("track.artists.{i}.name"))?,
                external_url: item.str_field(t, &format!("track.artists.{i}.href"))?,
            });
        }
    }
    Ok(TableFragment::from_records(records))
}

/// `artist_id` joins on the album's first artist even when the track
/// credits someone else first. Downstream joins depend on this
fn song_record(item: &RawItem) -> Result<SongRecord, EtlError> {
    let t = SongRecord::TABLE;
    Ok( SongRecord {
        song_id: item.str_field(t, "track.id")?,
        song_name: item.str_field(t, "track.name")?,
        song_duration: item.u64_field(t, "track.duration_ms")?,
        song_popularity: item.u32_field(t, "track.popularity")?,
        song_url: item.str_field(t, "track.external_urls.spotify")?,
        song_added: item.str_field(t, "added_at")?,
        album_id: item.str_field(t, "track.album.id")?,
        artist_id: item.str_field(t, "track.album.artists.0.id")?,
    })
}

pub fn song_table(items: &[RawItem]) -> Result<TableFragment<SongRecord>, EtlError> {
    let records = items.iter()
        .map(song_record)
        .collect::<Result<Vec<_>, EtlError>>()?;
    Ok(TableFragment::from_records(records))
}

#[derive(Debug, Clone)]
pub struct Tables {
    pub albums: TableFragment<AlbumRecord>,
    pub artists: TableFragment<ArtistRecord>,
    pub songs: TableFragment<SongRecord>
}

/// Runs the three transforms side by side over the same items. They share
/// nothing but the read-only input
pub async fn transform_all(items: Arc<[RawItem]>) -> Result<Tables, EtlError> {
    let (albums, artists, songs) = {
        let (a, b, c) = (items.clone(), items.clone(), items);
        tokio::join!(
            tokio::task::spawn_blocking(move || album_table(&a)),
            tokio::task::spawn_blocking(move || artist_table(&b)),
            tokio::task::spawn_blocking(move || song_table(&c)),
        )
    };

    let tables = Tables { albums: albums??, artists: artists??, songs: songs?? };
    tracing::info!(
        albums = tables.albums.len(),
        artists = tables.artists.len(),
        songs = tables.songs.len(),
        "transform.done"
    );
    Ok(tables)
}
