//! JSON-Patch (RFC 6902) on stored WAM documents.
//!
//! The patched document is re-validated in full before anything is written;
//! a failing operation or an invalid result leaves storage untouched.

use json_patch::Patch;
use mapstore_core::wam::WamFile;
use mapstore_core::{MapStoreError, MapStoreResult};
use serde_json::Value;
use tracing::{info, warn};

use crate::service::MapStore;
use crate::tenant::TenantPath;

/// Decode a request body into an operation list.
pub fn parse_patch(ops: Value) -> MapStoreResult<Patch> {
    serde_json::from_value(ops).map_err(|e| MapStoreError::PatchRejected(e.to_string()))
}

impl MapStore {
    /// Runs with the document's permit held.
    pub(crate) async fn apply_patch(&self, target: &TenantPath, patch: Patch) -> MapStoreResult<WamFile> {
        let current = self.fs.read_to_string(&target.stored).await?;
        let mut doc: Value = serde_json::from_str(&current).map_err(|e| {
            MapStoreError::PatchRejected(format!("stored document is not valid JSON: {e}"))
        })?;

        json_patch::patch(&mut doc, &patch.0)
            .map_err(|e| MapStoreError::PatchRejected(e.to_string()))?;

        let text = serde_json::to_string(&doc).map_err(|e| MapStoreError::Other(e.into()))?;
        let wam = match self.validator.validate_wam(&text) {
            Ok(wam) => wam,
            Err(report) => {
                warn!(path = %target.stored, "patched document failed validation");
                return Err(MapStoreError::InvalidFile(report));
            }
        };

        self.fs.write_string(&target.stored, text).await?;
        self.cache.upsert(&target.tenant, &target.rel, &wam).await?;
        self.notifier.notify(&target.tenant, target.rel.as_str());
        info!(path = %target.stored, ops = patch.0.len(), "wam patched");
        Ok(wam)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_rejects_unknown_ops() {
        assert!(parse_patch(json!([{"op": "add", "path": "/areas/-", "value": {}}])).is_ok());
        let err = parse_patch(json!([{"op": "frobnicate", "path": "/x"}])).unwrap_err();
        assert!(matches!(err, MapStoreError::PatchRejected(_)));
        assert!(parse_patch(json!({"op": "add"})).is_err());
    }
}
