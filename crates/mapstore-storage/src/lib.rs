//! mapstore-storage: the storage port consumed by the ingestion pipelines,
//! its OpenDAL implementation, and streamed directory archives.

pub mod archive;
pub mod filesystem;
pub mod operator;

pub use archive::{archive_stream, ArchiveStream};
pub use filesystem::{FileSystem, OpendalFileSystem};
pub use operator::{build_from_core_config, build_operator, S3Credentials};
