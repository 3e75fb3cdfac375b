//! mapstore-ingest: the ingestion pipelines behind the map storage API.
//!
//! - [`gate`]: per-path FIFO serialization of mutating operations
//! - [`upload`]: zip archive ingestion with batch-atomic validation
//! - [`put`]: single-file ingestion
//! - [`patch`]: JSON-Patch on WAM documents with validate-before-commit
//! - [`cache`]: per-tenant map listing
//! - [`service`]: [`MapStore`], tying the above to the storage port

pub mod cache;
pub mod classify;
pub mod gate;
pub mod notify;
pub mod patch;
pub mod put;
pub mod service;
pub mod tenant;
pub mod upload;
pub mod validator;

pub use cache::{MapListCache, MapsCacheEntry, MapsCacheFile, StorageMapListCache};
pub use classify::{FileKind, TMJ_EXTENSION_MESSAGE};
pub use gate::{PathGate, PathPermit};
pub use notify::{MapChangeNotifier, MapEvent};
pub use service::{IngestLimits, MapStore};
pub use tenant::{DomainPathMapper, PathMapper, TenantPath};
pub use upload::{read_batch, ArchiveEntry, UploadBatch, UploadReport};
pub use validator::{BasicMapValidator, FileContext, MapValidator, INVALID_WAM_MESSAGE};
