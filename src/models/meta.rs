use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Label carried by every build run naming the build that owns it.
pub const LABEL_BUILD_NAME: &str = "build-retention.dev/build-name";

/// Namespaced identity of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Equality-based label selector.
///
/// An object matches when every selector entry is present in its labels with
/// the same value. An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector matching the build runs owned by `build_name`.
    pub fn for_build(build_name: &str) -> Self {
        let mut match_labels = BTreeMap::new();
        match_labels.insert(LABEL_BUILD_NAME.to_string(), build_name.to_string());
        Self { match_labels }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::new("ci", "app-build").to_string(), "ci/app-build");
    }

    #[test]
    fn test_selector_for_build() {
        let selector = LabelSelector::for_build("app");
        let mut labels = BTreeMap::new();
        assert!(!selector.matches(&labels));

        labels.insert(LABEL_BUILD_NAME.to_string(), "other".to_string());
        assert!(!selector.matches(&labels));

        labels.insert(LABEL_BUILD_NAME.to_string(), "app".to_string());
        labels.insert("team".to_string(), "platform".to_string());
        assert!(selector.matches(&labels));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        assert!(LabelSelector::default().matches(&BTreeMap::new()));
    }
}
