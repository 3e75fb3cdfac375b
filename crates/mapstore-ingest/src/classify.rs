//! File classification and per-file validation shared by the archive and
//! single-file pipelines.

use mapstore_core::report::OrganizedErrors;
use mapstore_core::wam::WamFile;
use mapstore_core::VirtualPath;

use crate::validator::{FileContext, MapValidator, INVALID_WAM_MESSAGE};

pub const TMJ_EXTENSION_MESSAGE: &str =
    "Invalid file extension. Maps should end with the \".tmj\" extension.";

const ENCODING_MESSAGE: &str = "Invalid file encoding. The file must be UTF-8 text.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// `.tmj` map document
    Map,
    /// `.wam` metadata document
    Wam,
    /// `.json`; rejected if it looks like a map
    Json,
    /// Stored verbatim
    Other,
}

impl FileKind {
    pub fn of(path: &VirtualPath) -> Self {
        match path.extension() {
            Some("tmj") => FileKind::Map,
            Some("wam") => FileKind::Wam,
            Some("json") => FileKind::Json,
            _ => FileKind::Other,
        }
    }
}

/// Outcome of a successful check.
#[derive(Debug, Clone, PartialEq)]
pub enum Checked {
    Passthrough,
    Map,
    /// Parsed metadata, used to update the listing cache without re-reading
    Wam(WamFile),
}

/// Validate one file according to its kind.
pub async fn check_file(
    validator: &dyn MapValidator,
    data: &[u8],
    ctx: FileContext<'_>,
) -> Result<Checked, OrganizedErrors> {
    let kind = FileKind::of(ctx.path);
    if kind == FileKind::Other {
        return Ok(Checked::Passthrough);
    }
    let text = std::str::from_utf8(data)
        .map_err(|e| OrganizedErrors::map_error(ENCODING_MESSAGE, e.to_string()))?;

    match kind {
        FileKind::Json if validator.looks_like_map(text) => {
            Err(OrganizedErrors::map_error(TMJ_EXTENSION_MESSAGE, ""))
        }
        FileKind::Json | FileKind::Other => Ok(Checked::Passthrough),
        FileKind::Wam => validator.validate_wam(text).map(Checked::Wam).map_err(|mut e| {
            // keep the client-facing headline stable whatever the validator says
            if let Some(first) = e.map.first_mut() {
                first.message = INVALID_WAM_MESSAGE.to_string();
            }
            e
        }),
        FileKind::Map => validator.validate_map(text, ctx).await.map(|()| Checked::Map),
    }
}
