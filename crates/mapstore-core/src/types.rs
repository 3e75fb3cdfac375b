use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MapStoreError;

/// A tenant-scoped logical path, always in canonical form.
///
/// Canonical form: `/`-separated, no leading or trailing slash, no empty, `.`
/// or `..` segments. The empty string is the root. Backslashes are treated as
/// separators so archive entries produced on Windows map to the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VirtualPath(String);

impl VirtualPath {
    /// Parse and canonicalize a raw path. Rejects any `..` segment.
    pub fn parse(raw: &str) -> Result<Self, MapStoreError> {
        if raw.contains('\0') {
            return Err(MapStoreError::InvalidPath(raw.escape_default().to_string()));
        }
        let mut segments = Vec::new();
        for segment in raw.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => return Err(MapStoreError::InvalidPath(raw.to_string())),
                s => segments.push(s),
            }
        }
        Ok(VirtualPath(segments.join("/")))
    }

    pub fn root() -> Self {
        VirtualPath(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// True if any segment starts with `.` (dotfiles, `.git/`, `__MACOSX/._x`...).
    pub fn is_hidden(&self) -> bool {
        self.segments().any(|s| s.starts_with('.'))
    }

    /// Append a relative path. Both sides are canonical, so the result is too.
    pub fn join(&self, rel: &VirtualPath) -> VirtualPath {
        match (self.is_root(), rel.is_root()) {
            (true, _) => rel.clone(),
            (_, true) => self.clone(),
            _ => VirtualPath(format!("{}/{}", self.0, rel.0)),
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// File name without its final extension (`map.tmj` -> `map`).
    pub fn file_stem(&self) -> Option<&str> {
        let name = self.file_name()?;
        match name.rfind('.') {
            Some(0) | None => Some(name),
            Some(i) => Some(&name[..i]),
        }
    }

    /// Final extension without the dot, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name()?;
        match name.rfind('.') {
            Some(0) | None => None,
            Some(i) => Some(&name[i + 1..]),
        }
    }

    /// Exact, case-sensitive match: `map.WAM` is not a `.wam` document.
    pub fn has_extension(&self, ext: &str) -> bool {
        self.extension() == Some(ext)
    }

    /// Replace (or add) the final extension.
    pub fn with_extension(&self, ext: &str) -> VirtualPath {
        let parent = self.parent();
        let stem = self.file_stem().unwrap_or_default();
        let name = VirtualPath(format!("{stem}.{ext}"));
        parent.join(&name)
    }

    pub fn parent(&self) -> VirtualPath {
        match self.0.rfind('/') {
            Some(i) => VirtualPath(self.0[..i].to_string()),
            None => VirtualPath::root(),
        }
    }

    /// Relative remainder of `self` below `base`, if `self` is inside `base`.
    pub fn strip_prefix(&self, base: &VirtualPath) -> Option<VirtualPath> {
        if base.is_root() {
            return Some(self.clone());
        }
        if self == base {
            return Some(VirtualPath::root());
        }
        self.0
            .strip_prefix(&base.0)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|rest| VirtualPath(rest.to_string()))
    }

    /// Key prefix selecting everything below this path as a directory
    /// (`rooms/a` -> `rooms/a/`, root -> `""`).
    pub fn dir_prefix(&self) -> String {
        if self.is_root() {
            String::new()
        } else {
            format!("{}/", self.0)
        }
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl FromStr for VirtualPath {
    type Err = MapStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VirtualPath::parse(s)
    }
}

impl TryFrom<String> for VirtualPath {
    type Error = MapStoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VirtualPath::parse(&value)
    }
}

impl From<VirtualPath> for String {
    fn from(value: VirtualPath) -> Self {
        value.0
    }
}

impl AsRef<str> for VirtualPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn canonicalizes_equivalent_spellings() {
        let expected = VirtualPath::parse("rooms/a").unwrap();
        for raw in ["/rooms/a", "rooms/a/", "./rooms/a", "rooms//a", "rooms\\a"] {
            assert_eq!(VirtualPath::parse(raw).unwrap(), expected, "{raw}");
        }
    }

    #[test]
    fn rejects_traversal() {
        for raw in ["..", "../etc/passwd", "rooms/../../x", "a\\..\\b"] {
            assert!(
                matches!(VirtualPath::parse(raw), Err(MapStoreError::InvalidPath(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn dots_inside_names_are_not_traversal() {
        let p = VirtualPath::parse("rooms/my..map.tmj").unwrap();
        assert_eq!(p.extension(), Some("tmj"));
    }

    #[test]
    fn hidden_segments() {
        assert!(VirtualPath::parse(".git/config").unwrap().is_hidden());
        assert!(VirtualPath::parse("maps/.DS_Store").unwrap().is_hidden());
        assert!(!VirtualPath::parse("maps/office.tmj").unwrap().is_hidden());
    }

    #[test]
    fn name_parts() {
        let p = VirtualPath::parse("rooms/a/map.tmj").unwrap();
        assert_eq!(p.file_name(), Some("map.tmj"));
        assert_eq!(p.file_stem(), Some("map"));
        assert_eq!(p.extension(), Some("tmj"));
        assert_eq!(p.parent().as_str(), "rooms/a");
        assert_eq!(p.with_extension("wam").as_str(), "rooms/a/map.wam");
        assert!(p.has_extension("tmj"));
        assert!(!p.has_extension("TMJ"));

        let dotfile = VirtualPath::parse(".env").unwrap();
        assert_eq!(dotfile.extension(), None);
        assert_eq!(dotfile.file_stem(), Some(".env"));
    }

    #[test]
    fn join_and_strip_prefix() {
        let base = VirtualPath::parse("example.com/rooms").unwrap();
        let rel = VirtualPath::parse("a/map.wam").unwrap();
        let joined = base.join(&rel);
        assert_eq!(joined.as_str(), "example.com/rooms/a/map.wam");
        assert_eq!(joined.strip_prefix(&base), Some(rel));
        assert_eq!(VirtualPath::root().join(&base), base);
        assert!(VirtualPath::parse("example.community/x")
            .unwrap()
            .strip_prefix(&VirtualPath::parse("example.com").unwrap())
            .is_none());
    }

    #[test]
    fn dir_prefix() {
        assert_eq!(VirtualPath::root().dir_prefix(), "");
        assert_eq!(VirtualPath::parse("rooms/a").unwrap().dir_prefix(), "rooms/a/");
    }

    proptest! {
        #[test]
        fn parse_is_idempotent(raw in "[a-z./\\\\]{0,24}") {
            if let Ok(p) = VirtualPath::parse(&raw) {
                let again = VirtualPath::parse(p.as_str()).unwrap();
                prop_assert_eq!(&again, &p);
                prop_assert!(!p.segments().any(|s| s == ".." || s == "."));
                prop_assert!(!p.as_str().starts_with('/'));
            }
        }
    }
}
