use std::fmt;

/// Canonical identity of a suggestion source: the pair of (package, class)
/// names a source is registered under, mirroring how the platform resolves
/// a source's component at query time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceIdentifier {
    package_name: String,
    class_name: String,
}

impl SourceIdentifier {
    pub fn new(package_name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            class_name: class_name.into(),
        }
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Stable string form used as a map key, a per-tag executor tag, and a
    /// storage-layer column value. Not meant for display to a user.
    pub fn flatten(&self) -> String {
        format!("{}/{}", self.package_name, self.class_name)
    }

    /// Inverse of [`Self::flatten`]; package names are dotted and never
    /// contain a `/`, so splitting on the first one is unambiguous.
    pub fn parse(flattened: &str) -> Self {
        match flattened.split_once('/') {
            Some((package, class)) => Self::new(package, class),
            None => Self::new(flattened, ""),
        }
    }
}

impl fmt::Display for SourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.flatten())
    }
}
