//!
//! src/writer.rs  Andrew Belles  Oct 19th, 2026
//!
//! Serializes table fragments to csv and writes one whole object per
//! (table, run) into the store
//!

use chrono::{DateTime, Utc};

use crate::errors::EtlError;
use crate::store::SharedStore;
use crate::transform::{Record, TableFragment};

/// Where one table of one run is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDestination {
    pub table: &'static str,
    pub run_ts: DateTime<Utc>
}

impl TableDestination {
    pub fn new<R: Record>(run_ts: DateTime<Utc>) -> Self {
        Self { table: R::TABLE, run_ts }
    }

    /// <prefix><table>_data/<table>_transformed_<YYYYmmddTHHMMSS>.csv
    pub fn key(&self, transformed_prefix: &str) -> String {
        let ts_nodash = self.run_ts.format("%Y%m%dT%H%M%S");
        format!(
            "{transformed_prefix}{table}_data/{table}_transformed_{ts_nodash}.csv",
            table = self.table
        )
    }
}

#[derive(Debug, Clone)]
pub struct SerializedTable {
    pub bytes: Vec<u8>,
    pub content_length: usize
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenTable {
    pub table: &'static str,
    pub key: String,
    pub rows: usize,
    pub content_length: usize
}

/// Header row then one row per record, in fragment order. The header is
/// written even when the fragment is empty
pub fn serialize_table<R: Record>(fragment: &TableFragment<R>) -> Result<SerializedTable, EtlError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(R::COLUMNS)?;
    for record in fragment.records() {
        writer.serialize(record).map_err(|e| EtlError::Serialization(
            format!("{} record {:?}: {e}", R::TABLE, record.key())
        ))?;
    }

    let bytes = writer.into_inner()
        .map_err(|e| EtlError::Serialization(format!("flush {} table: {e}", R::TABLE)))?;
    let content_length = bytes.len();
    Ok( SerializedTable { bytes, content_length } )
}

/// Reads a written table back, refusing one whose header does not match
#[cfg(test)]
pub fn parse_table<R: Record>(bytes: &[u8]) -> Result<Vec<R>, EtlError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let headers = reader.headers()?;
    if !headers.iter().eq(R::COLUMNS.iter().copied()) {
        return Err(EtlError::Serialization(format!(
            "{} header mismatch: got {:?}", R::TABLE, headers
        )));
    }

    reader.deserialize()
        .map(|row| row.map_err(EtlError::from))
        .collect()
}

pub struct TableWriter {
    store: SharedStore,
    transformed_prefix: String
}

impl TableWriter {
    pub fn new(store: SharedStore, transformed_prefix: &str) -> Self {
        Self { store, transformed_prefix: transformed_prefix.to_string() }
    }

    pub async fn write<R: Record>(
        &self,
        fragment: &TableFragment<R>,
        run_ts: DateTime<Utc>
    ) -> Result<WrittenTable, EtlError> {
        let destination = TableDestination::new::<R>(run_ts);
        let key = destination.key(&self.transformed_prefix);
        let SerializedTable { bytes, content_length } = serialize_table(fragment)?;

        self.store.write(&key, bytes).await?;
        tracing::info!(
            table = R::TABLE, key = %key, rows = fragment.len(),
            bytes = content_length, "table.written"
        );
        Ok( WrittenTable { table: R::TABLE, key, rows: fragment.len(), content_length } )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;
    use crate::extract::fixtures::{item, items};
    use crate::store::memory::MemoryObjectStore;
    use crate::transform::{album_table, artist_table, song_table, AlbumRecord, ArtistRecord, SongRecord};

    fn run_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 13, 0, 0, 0).unwrap()
    }

    #[test]
    fn destination_key_layout() {
        let dest = TableDestination::new::<SongRecord>(run_ts());
        assert_eq!(
            dest.key("transformed_data/"),
            "transformed_data/song_data/song_transformed_20240713T000000.csv"
        );
    }

    #[test]
    fn song_table_csv_shape() -> Result<(), EtlError> {
        let items = items(vec![item("s1", "A1", &["lead"], &["feat"])]);
        let out = serialize_table(&song_table(&items)?)?;
        let text = String::from_utf8(out.bytes.clone()).unwrap();

        assert_eq!(out.content_length, out.bytes.len());
        assert_eq!(
            text,
            "song_id,song_name,song_duration,song_popularity,song_url,song_added,album_id,artist_id\n\
             s1,Song s1,201000,87,https://open.spotify.com/track/s1,2024-07-13T08:00:00Z,A1,lead\n"
        );
        Ok(())
    }

    #[test]
    fn empty_fragment_still_has_header() -> Result<(), EtlError> {
        let out = serialize_table(&TableFragment::<ArtistRecord>::from_records(vec![]))?;
        assert_eq!(out.bytes, b"artist_id,artist_name,external_url\n");
        Ok(())
    }

    #[test]
    fn awkward_text_round_trips() -> Result<(), EtlError> {
        let artists = TableFragment::from_records(vec![
            ArtistRecord {
                artist_id: "a1".into(),
                artist_name: "Tyler, The Creator".into(),
                external_url: "https://api.spotify.com/v1/artists/a1".into(),
            },
            ArtistRecord {
                artist_id: "a2".into(),
                artist_name: "The \"Quoted\"\nBand".into(),
                external_url: "https://api.spotify.com/v1/artists/a2".into(),
            },
        ]);

        let out = serialize_table(&artists)?;
        assert_eq!(parse_table::<ArtistRecord>(&out.bytes)?, artists.records());
        Ok(())
    }

    #[test]
    fn every_table_round_trips_and_is_deterministic() -> Result<(), EtlError> {
        let items = items(vec![
            item("s1", "A1", &["x"], &["x", "y"]),
            item("s2", "A1", &["x"], &["y"]),
            item("s3", "A2", &["z"], &["z"]),
        ]);

        let albums = album_table(&items)?;
        let first = serialize_table(&albums)?;
        assert_eq!(parse_table::<AlbumRecord>(&first.bytes)?, albums.records());
        assert_eq!(serialize_table(&album_table(&items)?)?.bytes, first.bytes);

        let artists = artist_table(&items)?;
        let first = serialize_table(&artists)?;
        assert_eq!(parse_table::<ArtistRecord>(&first.bytes)?, artists.records());
        assert_eq!(serialize_table(&artist_table(&items)?)?.bytes, first.bytes);

        let songs = song_table(&items)?;
        let first = serialize_table(&songs)?;
        assert_eq!(parse_table::<SongRecord>(&first.bytes)?, songs.records());
        assert_eq!(serialize_table(&song_table(&items)?)?.bytes, first.bytes);
        Ok(())
    }

    #[test]
    fn wrong_header_is_rejected() {
        let bytes = b"artist_id,name,url\na1,x,y\n";
        assert!(matches!(
            parse_table::<ArtistRecord>(bytes),
            Err(EtlError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn writer_puts_one_object_per_table() -> Result<(), EtlError> {
        let mem = Arc::new(MemoryObjectStore::new());
        let writer = TableWriter::new(mem.clone(), "transformed_data/");
        let items = items(vec![item("s1", "A1", &["x"], &["x"])]);

        let written = writer.write(&song_table(&items)?, run_ts()).await?;
        assert_eq!(written.key, "transformed_data/song_data/song_transformed_20240713T000000.csv");
        assert_eq!(written.rows, 1);

        let stored = mem.get(&written.key).unwrap();
        assert_eq!(stored.len(), written.content_length);
        assert_eq!(mem.keys(), vec![written.key]);
        Ok(())
    }
}
