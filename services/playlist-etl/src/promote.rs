//!
//! src/promote.rs  Andrew Belles  Oct 19th, 2026
//!
//! Moves a batch's raw pages from the unprocessed prefix to the processed
//! prefix once its tables are durable. Stores without rename get
//! copy-then-delete, one object at a time, and every object reports how
//! far it got
//!

use tracing::{debug, info, warn};

use crate::errors::EtlError;
use crate::raw::RawHandle;
use crate::store::SharedStore;

/// Staged -> Copied -> Promoted, or Staged -> CopyFailed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionState {
    Staged,
    Copied,
    Promoted,
    CopyFailed
}

impl PromotionState {
    pub fn as_str(self) -> &'static str {
        match self {
            PromotionState::Staged     => "staged",
            PromotionState::Copied     => "copied",
            PromotionState::Promoted   => "promoted",
            PromotionState::CopyFailed => "copy_failed"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionOutcome {
    pub source: String,
    pub destination: String,
    pub state: PromotionState,
    /// Destination was already present, no copy was made this call
    pub already_copied: bool,
    pub copy_error: Option<String>,
    /// Source could not be removed after the copy. The object still
    /// counts as promoted, the leftover source is cleaned up on retry
    pub delete_error: Option<String>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPromotion {
    /// Nothing was staged
    Empty,
    Complete,
    Partial,
    Failed
}

#[derive(Debug, Clone, Default)]
pub struct PromotionReport {
    pub outcomes: Vec<PromotionOutcome>
}

impl PromotionReport {
    pub fn status(&self) -> BatchPromotion {
        let failed = self.failed_keys().len();
        match (self.outcomes.len(), failed) {
            (0, _) => BatchPromotion::Empty,
            (_, 0) => BatchPromotion::Complete,
            (n, f) if n == f => BatchPromotion::Failed,
            _ => BatchPromotion::Partial,
        }
    }

    /// Sources that were never copied
    pub fn failed_keys(&self) -> Vec<String> {
        self.outcomes.iter()
            .filter(|o| o.state == PromotionState::CopyFailed)
            .map(|o| o.source.clone())
            .collect()
    }

    /// Promoted sources still sitting under the unprocessed prefix
    pub fn lingering_sources(&self) -> Vec<String> {
        self.outcomes.iter()
            .filter(|o| o.state == PromotionState::Promoted && o.delete_error.is_some())
            .map(|o| o.source.clone())
            .collect()
    }

    pub fn into_result(self) -> Result<Self, EtlError> {
        let failed = self.failed_keys();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(EtlError::PromotionPartialFailure { failed })
        }
    }
}

pub struct PromotionCoordinator {
    store: SharedStore,
    unprocessed_prefix: String,
    processed_prefix: String
}

impl PromotionCoordinator {
    pub fn new(store: SharedStore, unprocessed_prefix: &str, processed_prefix: &str) -> Self {
        Self {
            store,
            unprocessed_prefix: unprocessed_prefix.to_string(),
            processed_prefix: processed_prefix.to_string()
        }
    }

    pub fn destination_for(&self, source: &str) -> Option<String> {
        source.strip_prefix(&self.unprocessed_prefix)
            .filter(|rest| !rest.is_empty())
            .map(|rest| format!("{}{rest}", self.processed_prefix))
    }

    /// Caller guarantees every table of the batch is durable before this
    /// runs. Objects are promoted independently, a failure on one never
    /// stops the rest
    pub async fn promote(&self, handles: &[RawHandle]) -> PromotionReport {
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(self.promote_one(&handle.key).await);
        }
        let report = PromotionReport { outcomes };

        info!(
            objects = report.outcomes.len(),
            failed = report.failed_keys().len(),
            lingering = report.lingering_sources().len(),
            status = ?report.status(),
            "promote.done"
        );
        report
    }

    async fn promote_one(&self, source: &str) -> PromotionOutcome {
        let mut outcome = PromotionOutcome {
            source: source.to_string(),
            destination: String::new(),
            state: PromotionState::Staged,
            already_copied: false,
            copy_error: None,
            delete_error: None
        };

        let Some(destination) = self.destination_for(source) else {
            outcome.state = PromotionState::CopyFailed;
            outcome.copy_error = Some(format!(
                "{source} is not under {}", self.unprocessed_prefix
            ));
            warn!(source = %source, "promote.copy_failed.outside_prefix");
            return outcome;
        };
        outcome.destination = destination.clone();

        // an existing destination is only trusted when it holds the same bytes
        match self.store.exists(&destination).await {
            Ok(true) => {
                if let Err(reason) = self.matches_destination(source, &destination).await {
                    warn!(
                        source = %source, destination = %destination, error = %reason,
                        "promote.copy_failed.destination_differs"
                    );
                    outcome.state = PromotionState::CopyFailed;
                    outcome.copy_error = Some(reason);
                    return outcome;
                }
                outcome.already_copied = true;
                outcome.state = PromotionState::Copied;
            }
            Ok(false) | Err(_) => match self.store.copy(source, &destination).await {
                Ok(()) => outcome.state = PromotionState::Copied,
                Err(e) => {
                    warn!(source = %source, error = %e, "promote.copy_failed");
                    outcome.state = PromotionState::CopyFailed;
                    outcome.copy_error = Some(e.to_string());
                    return outcome;
                }
            }
        }
        debug!(
            source = %source, destination = %destination,
            already_copied = outcome.already_copied, state = outcome.state.as_str(),
            "promote.copied"
        );

        let source_present = match self.store.exists(source).await {
            Ok(present) => present,
            Err(_) => true
        };
        if source_present {
            if let Err(e) = self.store.delete(source).await {
                warn!(source = %source, error = %e, "promote.delete_failed");
                outcome.delete_error = Some(e.to_string());
            }
        }

        outcome.state = PromotionState::Promoted;
        outcome
    }

    /// Ok when the destination is an earlier copy of `source`, or the
    /// source is already gone
    async fn matches_destination(&self, source: &str, destination: &str) -> Result<(), String> {
        if !self.store.exists(source).await.unwrap_or(true) {
            return Ok(());
        }
        let src = self.store.read(source).await.map_err(|e| e.to_string())?;
        let dst = self.store.read(destination).await.map_err(|e| e.to_string())?;
        if src == dst {
            Ok(())
        } else {
            Err(format!("{destination} already holds a different payload"))
        }
    }
}
