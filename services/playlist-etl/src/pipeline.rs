//!
//! src/pipeline.rs  Andrew Belles  Oct 19th, 2026
//!
//! Wires one run together: stage fetched pages, read everything still
//! unprocessed, transform, write the three tables, then promote the raw
//! pages. Each stage hands its output straight to the next
//!

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::errors::EtlError;
use crate::extract::extract_items;
use crate::fetch::PlaylistSource;
use crate::promote::{PromotionCoordinator, PromotionReport};
use crate::raw::{RawHandle, RawRecordStore};
use crate::store::SharedStore;
use crate::transform::transform_all;
use crate::writer::{TableWriter, WrittenTable};

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub run_ts: DateTime<Utc>,
    pub payloads: usize,
    pub items: usize,
    pub tables: Vec<WrittenTable>,
    pub promotion: PromotionReport
}

pub struct Pipeline {
    raw: RawRecordStore,
    writer: TableWriter,
    promoter: PromotionCoordinator
}

impl Pipeline {
    pub fn new(store: SharedStore, cfg: &StorageConfig) -> Self {
        let raw = RawRecordStore::new(store.clone(), cfg);
        let writer = TableWriter::new(store.clone(), &cfg.transformed_prefix);
        let promoter = PromotionCoordinator::new(
            store,
            raw.unprocessed_prefix(),
            raw.processed_prefix()
        );
        Self { raw, writer, promoter }
    }

    /// Fetches the playlist and stages every page under the unprocessed
    /// prefix
    pub async fn ingest(
        &self,
        source: &dyn PlaylistSource,
        playlist_id: &str,
        fetched_at: DateTime<Utc>
    ) -> Result<Vec<RawHandle>, EtlError> {
        let pages = source.fetch_playlist(playlist_id).await?;
        let mut handles = Vec::with_capacity(pages.len());
        for (page_no, page) in pages.iter().enumerate() {
            handles.push(self.raw.stage(page, fetched_at, page_no).await?);
        }
        info!(playlist = %playlist_id, staged = handles.len(), "etl.ingest.done");
        Ok(handles)
    }

    /// Processes everything under the unprocessed prefix as one batch.
    /// Raw pages are only promoted after all three tables are written,
    /// and never once `cancel` has fired
    pub async fn run_batch(
        &self,
        run_ts: DateTime<Utc>,
        cancel: &CancellationToken
    ) -> Result<BatchSummary, EtlError> {
        let handles = self.raw.list_unprocessed().await?;
        if handles.is_empty() {
            info!("etl.batch.empty");
            return Ok( BatchSummary {
                run_ts,
                payloads: 0,
                items: 0,
                tables: Vec::new(),
                promotion: PromotionReport::default()
            });
        }
        info!(payloads = handles.len(), "etl.batch.start");

        let payloads = self.raw.read_all(&handles).await?;
        let items: Arc<[_]> = extract_items(&payloads)?.into();
        let item_count = items.len();
        let tables = transform_all(items).await?;
        if tables.songs.is_empty() {
            warn!(payloads = handles.len(), "etl.batch.no_songs");
        }

        if cancel.is_cancelled() {
            warn!("etl.batch.cancelled.before_write");
            return Err(EtlError::Cancelled("table writes"));
        }

        // barrier: every table durable before any raw page moves
        let (albums, artists, songs) = tokio::try_join!(
            self.writer.write(&tables.albums, run_ts),
            self.writer.write(&tables.artists, run_ts),
            self.writer.write(&tables.songs, run_ts),
        )?;

        if cancel.is_cancelled() {
            warn!("etl.batch.cancelled.before_promote");
            return Err(EtlError::Cancelled("promotion"));
        }

        let promotion = self.promoter.promote(&handles).await;
        info!(
            payloads = handles.len(), items = item_count,
            status = ?promotion.status(), "etl.batch.done"
        );

        Ok( BatchSummary {
            run_ts,
            payloads: handles.len(),
            items: item_count,
            tables: vec![albums, artists, songs],
            promotion
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::Value;

    use super::*;
    use crate::extract::fixtures::{item, page};
    use crate::promote::BatchPromotion;
    use crate::store::memory::MemoryObjectStore;
    use crate::transform::{AlbumRecord, ArtistRecord, SongRecord};
    use crate::writer::parse_table;

    struct CannedSource(Vec<Value>);

    #[async_trait]
    impl PlaylistSource for CannedSource {
        async fn fetch_playlist(&self, _playlist_id: &str) -> Result<Vec<Value>, EtlError> {
            Ok(self.0.clone())
        }
    }

    fn run_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 13, 6, 0, 0).unwrap()
    }

    fn setup() -> (Arc<MemoryObjectStore>, Pipeline) {
        let mem = Arc::new(MemoryObjectStore::new());
        let pipeline = Pipeline::new(mem.clone(), &StorageConfig::default());
        (mem, pipeline)
    }

    fn source() -> CannedSource {
        CannedSource(vec![
            page(vec![
                item("s1", "A1", &["lead"], &["lead", "feat"]),
                item("s2", "A1", &["lead"], &["lead"]),
            ]),
            page(vec![item("s1", "A1", &["lead"], &["lead"]), item("s3", "A2", &["solo"], &[])]),
        ])
    }

    fn keys_under(mem: &MemoryObjectStore, prefix: &str) -> Vec<String> {
        mem.keys().into_iter().filter(|k| k.starts_with(prefix)).collect()
    }

    #[tokio::test]
    async fn full_run_writes_tables_then_promotes() -> Result<(), EtlError> {
        let (mem, pipeline) = setup();
        let staged = pipeline.ingest(&source(), "p", run_ts()).await?;
        assert_eq!(staged.len(), 2);

        let summary = pipeline.run_batch(run_ts(), &CancellationToken::new()).await?;
        assert_eq!((summary.payloads, summary.items), (2, 4));
        assert_eq!(summary.promotion.status(), BatchPromotion::Complete);

        assert!(keys_under(&mem, "raw_data/to_processed/").is_empty());
        assert_eq!(keys_under(&mem, "raw_data/processed/").len(), 2);

        let songs_key = "transformed_data/song_data/song_transformed_20240713T060000.csv";
        let songs = parse_table::<SongRecord>(&mem.get(songs_key).unwrap())?;
        assert_eq!(
            songs.iter().map(|s| s.song_id.as_str()).collect::<Vec<_>>(),
            ["s1", "s2", "s3"]
        );
        assert_eq!(songs[2].artist_id, "solo");

        let albums_key = "transformed_data/album_data/album_transformed_20240713T060000.csv";
        assert_eq!(parse_table::<AlbumRecord>(&mem.get(albums_key).unwrap())?.len(), 2);

        let artists_key = "transformed_data/artist_data/artist_transformed_20240713T060000.csv";
        let artists = parse_table::<ArtistRecord>(&mem.get(artists_key).unwrap())?;
        assert_eq!(
            artists.iter().map(|a| a.artist_id.as_str()).collect::<Vec<_>>(),
            ["lead", "feat"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn rerun_after_promotion_is_empty() -> Result<(), EtlError> {
        let (_mem, pipeline) = setup();
        pipeline.ingest(&source(), "p", run_ts()).await?;
        pipeline.run_batch(run_ts(), &CancellationToken::new()).await?;

        let again = pipeline.run_batch(run_ts(), &CancellationToken::new()).await?;
        assert_eq!(again.payloads, 0);
        assert!(again.tables.is_empty());
        assert_eq!(again.promotion.status(), BatchPromotion::Empty);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_run_moves_nothing() -> Result<(), EtlError> {
        let (mem, pipeline) = setup();
        pipeline.ingest(&source(), "p", run_ts()).await?;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pipeline.run_batch(run_ts(), &cancel).await;
        assert!(matches!(result, Err(EtlError::Cancelled(_))));
        assert_eq!(keys_under(&mem, "raw_data/to_processed/").len(), 2);
        assert!(keys_under(&mem, "raw_data/processed/").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_table_write_blocks_promotion() -> Result<(), EtlError> {
        let (mem, pipeline) = setup();
        pipeline.ingest(&source(), "p", run_ts()).await?;
        mem.fail_write_of("transformed_data/artist_data/");

        let result = pipeline.run_batch(run_ts(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(EtlError::Storage(_))));
        assert_eq!(keys_under(&mem, "raw_data/to_processed/").len(), 2);
        assert!(keys_under(&mem, "raw_data/processed/").is_empty());

        // same raw input, same output once the store recovers
        mem.heal();
        let summary = pipeline.run_batch(run_ts(), &CancellationToken::new()).await?;
        assert_eq!(summary.promotion.status(), BatchPromotion::Complete);
        Ok(())
    }

    #[tokio::test]
    async fn incomplete_item_fails_batch_and_keeps_raw() -> Result<(), EtlError> {
        let (mem, pipeline) = setup();
        let mut broken = item("s9", "A9", &["x"], &["x"]);
        broken["track"].as_object_mut().unwrap().remove("popularity");
        pipeline.ingest(&CannedSource(vec![page(vec![broken])]), "p", run_ts()).await?;

        let result = pipeline.run_batch(run_ts(), &CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(EtlError::IncompleteRecord { table: "song", index: 0, .. })
        ));
        assert_eq!(keys_under(&mem, "raw_data/to_processed/").len(), 1);
        assert!(keys_under(&mem, "transformed_data/").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn name_clash_with_processed_page_never_drops_new_page() -> Result<(), EtlError> {
        let (mem, pipeline) = setup();
        let name = "spotify_raw_20240713060000.json";
        let older = serde_json::to_vec(&page(vec![item("s0", "A0", &["old"], &["old"])]))?;
        mem.insert(&format!("raw_data/processed/{name}"), older.clone());

        // staging refuses the clash outright
        assert!(matches!(
            pipeline.ingest(&source(), "p", run_ts()).await,
            Err(EtlError::Storage(_))
        ));

        // a clashing page that arrives some other way stays unprocessed
        let newer = serde_json::to_vec(&page(vec![item("s1", "A1", &["x"], &["x"])]))?;
        mem.insert(&format!("raw_data/to_processed/{name}"), newer.clone());
        let summary = pipeline.run_batch(run_ts(), &CancellationToken::new()).await?;

        assert_eq!(summary.promotion.status(), BatchPromotion::Failed);
        assert!(!summary.promotion.outcomes[0].already_copied);
        assert_eq!(mem.get(&format!("raw_data/to_processed/{name}")), Some(newer));
        assert_eq!(mem.get(&format!("raw_data/processed/{name}")), Some(older));
        assert!(summary.promotion.into_result().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn lingering_source_is_reprocessed_without_recopy() -> Result<(), EtlError> {
        let (mem, pipeline) = setup();
        let staged = pipeline.ingest(&source(), "p", run_ts()).await?;
        mem.fail_delete_of(&staged[0].key);

        let first = pipeline.run_batch(run_ts(), &CancellationToken::new()).await?;
        assert_eq!(first.promotion.lingering_sources(), vec![staged[0].key.clone()]);
        let copies = mem.copies().len();

        mem.heal();
        let second = pipeline.run_batch(run_ts(), &CancellationToken::new()).await?;
        assert_eq!(second.payloads, 1);
        assert!(second.promotion.outcomes[0].already_copied);
        assert_eq!(mem.copies().len(), copies);
        assert!(keys_under(&mem, "raw_data/to_processed/").is_empty());
        Ok(())
    }
}
