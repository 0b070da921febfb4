//! Bulk rekey after a master key rotation.

use crate::encryption::RekeyOutcome;
use crate::error::{TransformError, TransformResult};
use crate::metadata::ENC_KEY_ID;
use crate::store::{ObjectStore, TransformingStore};
use tracing::{debug, warn};

/// What a bulk rekey did.
#[derive(Debug, Default)]
pub struct RekeySummary {
    pub rekeyed: Vec<String>,
    pub already_current: Vec<String>,
    /// Objects without encryption metadata.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, TransformError)>,
}

impl RekeySummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.rekeyed.len() + self.already_current.len() + self.skipped.len() + self.failed.len()
    }
}

/// Rekeys every object under `prefix`.
///
/// Per-object failures are collected rather than returned, so one bad
/// object does not stop the rest. Only a failed listing is an error.
pub fn rekey_all<S: ObjectStore>(store: &TransformingStore<S>, prefix: &str) -> TransformResult<RekeySummary> {
    let mut summary = RekeySummary::default();
    for key in store.inner().list(prefix)? {
        let result = store
            .head(&key)
            .and_then(|meta| {
                if meta.contains_key(ENC_KEY_ID) {
                    store.rekey_with(&key, &meta).map(Some)
                } else {
                    Ok(None)
                }
            });
        match result {
            Ok(Some(RekeyOutcome::Rekeyed(_))) => summary.rekeyed.push(key),
            Ok(Some(RekeyOutcome::AlreadyCurrent)) => summary.already_current.push(key),
            Ok(None) => {
                warn!("Skipping {key}: not encrypted");
                summary.skipped.push(key);
            }
            Err(e) => {
                warn!("Rekey of {key} failed: {e}");
                summary.failed.push((key, e));
            }
        }
    }
    debug!(
        "Bulk rekey of {prefix:?}: {} rekeyed, {} current, {} skipped, {} failed",
        summary.rekeyed.len(),
        summary.already_current.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    Ok(summary)
}
