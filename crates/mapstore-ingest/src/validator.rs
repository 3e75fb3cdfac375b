//! Map validator port and the built-in structural rule set.
//!
//! The pipelines only depend on [`MapValidator`]; [`BasicMapValidator`] is the
//! default implementation wired by the daemon. It checks the Tiled JSON shape
//! the client needs to load a map and, when the caller knows which sibling
//! files exist (archive uploads), that tileset images and scripts referenced
//! by the map are part of the upload.

use async_trait::async_trait;
use mapstore_core::report::{OrganizedErrors, ValidationError};
use mapstore_core::wam::WamFile;
use mapstore_core::VirtualPath;
use serde_json::Value;
use std::collections::HashSet;

pub const INVALID_WAM_MESSAGE: &str = "Invalid WAM file format.";

/// Where a map document lives and which files are uploaded alongside it.
#[derive(Debug, Clone, Copy)]
pub struct FileContext<'a> {
    /// Path of the document being validated, relative to the upload root
    pub path: &'a VirtualPath,
    /// Every file of the upload, relative to the same root. `None` when the
    /// surrounding files are unknown (single-file upload): references are
    /// then not checked.
    pub available: Option<&'a [VirtualPath]>,
}

#[async_trait]
pub trait MapValidator: Send + Sync {
    /// Cheap structural sniff: does this JSON text look like a Tiled map?
    fn looks_like_map(&self, text: &str) -> bool;

    /// Validate a `.tmj` map document.
    async fn validate_map(&self, text: &str, ctx: FileContext<'_>)
        -> Result<(), OrganizedErrors>;

    /// Validate a `.wam` metadata document and return its parsed form.
    fn validate_wam(&self, text: &str) -> Result<WamFile, OrganizedErrors>;
}

const ORIENTATIONS: &[&str] = &["orthogonal", "isometric", "staggered", "hexagonal"];

#[derive(Debug, Clone, Default)]
pub struct BasicMapValidator;

impl BasicMapValidator {
    pub fn new() -> Self {
        Self
    }
}

fn positive_int(
    map: &serde_json::Map<String, Value>,
    field: &str,
    errors: &mut Vec<ValidationError>,
) {
    match map.get(field).and_then(Value::as_u64) {
        Some(n) if n > 0 => {}
        _ => errors.push(ValidationError::error(
            format!("Invalid map: \"{field}\" must be a positive integer."),
            "",
        )),
    }
}

/// Resolve `reference` relative to the directory of `from`. `None` if the
/// reference is external (URL, absolute) or climbs above the upload root.
fn resolve_reference(from: &VirtualPath, reference: &str) -> Option<Result<VirtualPath, ()>> {
    if reference.contains("://") || reference.starts_with("data:") || reference.starts_with('/')
    {
        return None;
    }
    let parent = from.parent();
    let mut segments: Vec<&str> = parent.segments().collect();
    for part in reference.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Some(Err(()));
                }
            }
            s => segments.push(s),
        }
    }
    Some(VirtualPath::parse(&segments.join("/")).map_err(|_| ()))
}

fn check_reference(
    ctx: &FileContext<'_>,
    available: &HashSet<&VirtualPath>,
    reference: &str,
    what: &str,
) -> Option<ValidationError> {
    match resolve_reference(ctx.path, reference)? {
        Ok(target) if available.contains(&target) => None,
        Ok(_) => Some(ValidationError::error(
            format!("{what} \"{reference}\" could not be found in the upload."),
            format!("referenced from {}", ctx.path.as_str()),
        )),
        Err(()) => Some(ValidationError::error(
            format!("{what} \"{reference}\" points outside of the upload."),
            format!("referenced from {}", ctx.path.as_str()),
        )),
    }
}

#[async_trait]
impl MapValidator for BasicMapValidator {
    fn looks_like_map(&self, text: &str) -> bool {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) else {
            return false;
        };
        map.get("layers").is_some_and(Value::is_array)
            && (map.contains_key("tilesets") || map.contains_key("tilewidth"))
    }

    async fn validate_map(
        &self,
        text: &str,
        ctx: FileContext<'_>,
    ) -> Result<(), OrganizedErrors> {
        let value: Value = serde_json::from_str(text).map_err(|e| {
            OrganizedErrors::map_error("Invalid map: the file is not valid JSON.", e.to_string())
        })?;
        let Value::Object(map) = value else {
            return Err(OrganizedErrors::map_error(
                "Invalid map: the document must be a JSON object.",
                "",
            ));
        };

        let mut report = OrganizedErrors::default();

        if map.get("type").and_then(Value::as_str) != Some("map") {
            report.map.push(ValidationError::error(
                "Invalid map: \"type\" must be \"map\".",
                "",
            ));
        }
        for field in ["width", "height", "tilewidth", "tileheight"] {
            positive_int(&map, field, &mut report.map);
        }
        match map.get("orientation").and_then(Value::as_str) {
            Some(o) if ORIENTATIONS.contains(&o) => {}
            other => report.map.push(ValidationError::error(
                "Invalid map: unknown orientation.",
                format!("got {other:?}, expected one of {ORIENTATIONS:?}"),
            )),
        }
        if !map.get("layers").is_some_and(Value::is_array) {
            report.map.push(ValidationError::error(
                "Invalid map: \"layers\" must be an array.",
                "",
            ));
        }

        let tilesets = match map.get("tilesets") {
            None => &[][..],
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => {
                report.tilesets.push(ValidationError::error(
                    "Invalid map: \"tilesets\" must be an array.",
                    "",
                ));
                &[][..]
            }
        };

        if let Some(available) = ctx.available {
            let available: HashSet<&VirtualPath> = available.iter().collect();
            for tileset in tilesets {
                for (field, what) in [("image", "Tileset image"), ("source", "Tileset")] {
                    if let Some(reference) = tileset.get(field).and_then(Value::as_str) {
                        report
                            .tilesets
                            .extend(check_reference(&ctx, &available, reference, what));
                    }
                }
            }

            let scripts = map
                .get("properties")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter(|p| p.get("name").and_then(Value::as_str) == Some("script"))
                .filter_map(|p| p.get("value").and_then(Value::as_str));
            for script in scripts {
                report
                    .scripts
                    .extend(check_reference(&ctx, &available, script, "Script"));
            }
        }

        if report.has_errors() {
            Err(report)
        } else {
            Ok(())
        }
    }

    fn validate_wam(&self, text: &str) -> Result<WamFile, OrganizedErrors> {
        let wam: WamFile = serde_json::from_str(text)
            .map_err(|e| OrganizedErrors::map_error(INVALID_WAM_MESSAGE, e.to_string()))?;

        let mut issues = Vec::new();
        let semver = wam.version.split('.').collect::<Vec<_>>();
        let numeric = |p: &&str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
        if semver.len() != 3 || !semver.iter().all(numeric) {
            issues.push(format!(
                "version: \"{}\" is not a MAJOR.MINOR.PATCH version",
                wam.version
            ));
        }
        if wam.map_url.trim().is_empty() {
            issues.push("mapUrl: must not be empty".to_string());
        }

        let mut area_ids = HashSet::new();
        for (i, area) in wam.areas.iter().enumerate() {
            if !area_ids.insert(area.id.as_str()) {
                issues.push(format!("areas[{i}].id: duplicate id \"{}\"", area.id));
            }
            if area.width < 0.0 || area.height < 0.0 {
                issues.push(format!("areas[{i}]: width and height must not be negative"));
            }
        }
        let mut entity_ids = HashSet::new();
        for (i, entity) in wam.entities.iter().enumerate() {
            if !entity_ids.insert(entity.id.as_str()) {
                issues.push(format!("entities[{i}].id: duplicate id \"{}\"", entity.id));
            }
        }

        if issues.is_empty() {
            Ok(wam)
        } else {
            Err(OrganizedErrors::map_error(INVALID_WAM_MESSAGE, issues.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tiled_map() -> Value {
        json!({
            "type": "map",
            "orientation": "orthogonal",
            "width": 10, "height": 10,
            "tilewidth": 32, "tileheight": 32,
            "layers": [],
            "tilesets": [{"firstgid": 1, "image": "tiles/floor.png", "name": "floor"}],
            "properties": [{"name": "script", "type": "string", "value": "scripts/main.js"}]
        })
    }

    fn p(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    #[test]
    fn sniffs_maps() {
        let v = BasicMapValidator::new();
        assert!(v.looks_like_map(&tiled_map().to_string()));
        assert!(!v.looks_like_map(r#"{"name": "package", "version": "1.0.0"}"#));
        assert!(!v.looks_like_map("not json"));
        assert!(!v.looks_like_map("[1, 2]"));
    }

    #[tokio::test]
    async fn accepts_valid_map_without_context() {
        let v = BasicMapValidator::new();
        let path = p("map.tmj");
        let ctx = FileContext { path: &path, available: None };
        assert!(v.validate_map(&tiled_map().to_string(), ctx).await.is_ok());
    }

    #[tokio::test]
    async fn structural_errors_are_reported() {
        let v = BasicMapValidator::new();
        let path = p("map.tmj");
        let ctx = FileContext { path: &path, available: None };
        let report = v
            .validate_map(r#"{"type": "tileset", "width": 0}"#, ctx)
            .await
            .unwrap_err();
        // type, width, height, tilewidth, tileheight, orientation, layers
        assert_eq!(report.map.len(), 7, "{report:?}");
    }

    #[tokio::test]
    async fn missing_references_are_reported_per_category() {
        let v = BasicMapValidator::new();
        let path = p("rooms/map.tmj");
        let available = vec![p("rooms/map.tmj")];
        let ctx = FileContext { path: &path, available: Some(&available) };
        let report = v
            .validate_map(&tiled_map().to_string(), ctx)
            .await
            .unwrap_err();
        assert_eq!(report.tilesets.len(), 1);
        assert_eq!(report.scripts.len(), 1);
        assert!(report.map.is_empty());
    }

    #[tokio::test]
    async fn relative_references_resolve_against_map_directory() {
        let v = BasicMapValidator::new();
        let mut map = tiled_map();
        map["tilesets"][0]["image"] = json!("../shared/floor.png");
        map["properties"] = json!([]);
        let path = p("rooms/map.tmj");
        let available = vec![p("rooms/map.tmj"), p("shared/floor.png")];
        let ctx = FileContext { path: &path, available: Some(&available) };
        assert!(v.validate_map(&map.to_string(), ctx).await.is_ok());

        map["tilesets"][0]["image"] = json!("../../floor.png");
        let err = v.validate_map(&map.to_string(), ctx).await.unwrap_err();
        assert!(err.tilesets[0].message.contains("outside"));
    }

    #[test]
    fn wam_semantic_rules() {
        let v = BasicMapValidator::new();
        let ok = json!({"version": "1.0.0", "mapUrl": "./map.tmj", "areas": [], "entities": []});
        assert!(v.validate_wam(&ok.to_string()).is_ok());

        let bad = json!({
            "version": "one",
            "mapUrl": "",
            "areas": [
                {"id": "a", "x": 0, "y": 0, "width": 1, "height": 1},
                {"id": "a", "x": 0, "y": 0, "width": -1, "height": 1}
            ],
            "entities": []
        });
        let report = v.validate_wam(&bad.to_string()).unwrap_err();
        assert_eq!(report.map.len(), 1);
        assert_eq!(report.map[0].message, INVALID_WAM_MESSAGE);
        let details = &report.map[0].details;
        assert!(details.contains("version"));
        assert!(details.contains("mapUrl"));
        assert!(details.contains("duplicate"));
        assert!(details.contains("negative"));
    }

    #[test]
    fn wam_parse_errors_carry_details() {
        let v = BasicMapValidator::new();
        let report = v.validate_wam(r#"{"version": "1.0.0"}"#).unwrap_err();
        assert!(report.map[0].details.contains("mapUrl"));
    }
}
