pub mod config;
pub mod error;
pub mod report;
pub mod types;
pub mod wam;

pub use error::{MapStoreError, MapStoreResult};
pub use report::{OrganizedErrors, Severity, ValidationError, ValidationErrorSet};
pub use types::VirtualPath;
pub use wam::WamFile;
