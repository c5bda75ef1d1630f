//!
//! src/main.rs  Andrew Belles  Oct 19th, 2026
//!
//! One scheduled run of the playlist etl: fetch the playlist, stage the
//! raw pages, build the album/artist/song tables and promote the pages
//! the tables were built from
//!
//!

mod config;
mod errors;
mod logging;

mod extract;
mod fetch;
mod pipeline;
mod promote;
mod raw;
mod store;
mod transform;
mod writer;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::errors::EtlError;
use crate::store::{DiskObjectStore, SharedStore};

#[tokio::main]
async fn main() -> Result<(), EtlError> {
    let cfgs    = config::load_config()?;
    let _logger = logging::init_logging(&cfgs.logging)?;

    info!(
        service = "playlist-etl",
        version = %env!("CARGO_PKG_VERSION"),
        playlist = %cfgs.playlist.playlist_id,
        store = %cfgs.storage.root,
        "starting"
    );

    let spotify = fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify, &cfgs.playlist)?;
    let store: SharedStore = Arc::new(DiskObjectStore::new(&cfgs.storage.root));
    let pipeline = pipeline::Pipeline::new(store, &cfgs.storage);

    let shutdown = CancellationToken::new();
    let trigger = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(msg = "cancelling run, raw pages stay unprocessed", "etl.signal");
                shutdown.cancel();
            }
        })
    };

    let run_ts = chrono::Utc::now();
    let run_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("etl.run", run_id = %run_id, run_ts = %run_ts.to_rfc3339());

    let result = async {
        pipeline.ingest(&spotify, &cfgs.playlist.playlist_id, run_ts).await?;
        let summary = pipeline.run_batch(run_ts, &shutdown).await?;
        info!(
            run_ts = %summary.run_ts, payloads = summary.payloads, items = summary.items,
            "etl.summary"
        );
        for table in &summary.tables {
            info!(
                table = table.table, key = %table.key, rows = table.rows,
                bytes = table.content_length, "etl.table"
            );
        }
        for outcome in &summary.promotion.outcomes {
            if let Some(e) = &outcome.copy_error {
                warn!(source = %outcome.source, error = %e, "etl.raw.not_promoted");
            }
            if let Some(e) = &outcome.delete_error {
                warn!(
                    source = %outcome.source, destination = %outcome.destination,
                    error = %e, "etl.raw.source_lingering"
                );
            }
        }
        summary.promotion.into_result().map(|_| ())
    }
    .instrument(span)
    .await;

    trigger.abort();
    match &result {
        Ok(()) => info!(run_id = %run_id, "etl.exit"),
        Err(e) => tracing::error!(run_id = %run_id, error = %e, "etl.failed"),
    }
    result
}
