//! Single-file upload.

use bytes::Bytes;
use mapstore_core::{MapStoreError, MapStoreResult};
use tracing::{info, warn};

use crate::classify::{check_file, Checked};
use crate::service::MapStore;
use crate::tenant::TenantPath;
use crate::validator::FileContext;

impl MapStore {
    /// Runs with the target path's permit held.
    pub(crate) async fn ingest_file(&self, target: &TenantPath, data: Bytes) -> MapStoreResult<()> {
        let limit = self.limits.max_uncompressed_size;
        if data.len() as u64 > limit {
            return Err(MapStoreError::PayloadTooLarge { limit });
        }

        // sibling files are unknown here, so references are not checked
        let ctx = FileContext {
            path: &target.rel,
            available: None,
        };
        let checked = match check_file(self.validator.as_ref(), &data, ctx).await {
            Ok(checked) => checked,
            Err(report) => {
                warn!(path = %target.stored, errors = report.len(), "file rejected");
                return Err(MapStoreError::InvalidFile(report));
            }
        };

        let size = data.len();
        self.fs.write(&target.stored, data).await?;

        if let Checked::Wam(wam) = checked {
            self.cache.upsert(&target.tenant, &target.rel, &wam).await?;
            self.notifier.notify(&target.tenant, target.rel.as_str());
        }
        info!(path = %target.stored, bytes = size, "file stored");
        Ok(())
    }
}
