//! Stream identity: `"{category}:{version}-{threadId}"`.
//!
//! One logical session (thread) maps to exactly one stream. The version
//! segment exists for schema evolution: a payload change mints a new version
//! (`v0` → `v1`) and new sessions land on new streams; old events are never
//! rewritten.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Default stream category for agent sessions.
pub const DEFAULT_CATEGORY: &str = "agent";

/// Default stream schema version.
pub const DEFAULT_VERSION: &str = "v0";

/// Errors from building or parsing a [`StreamName`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamNameError {
    #[error("category must be non-empty and must not contain ':' (got {0:?})")]
    InvalidCategory(String),
    #[error("version must be non-empty and must not contain '-' (got {0:?})")]
    InvalidVersion(String),
    #[error("thread id is not a UUID: {0:?}")]
    InvalidThreadId(String),
    #[error("stream name {0:?} does not match category:version-threadId")]
    Malformed(String),
}

/// Parsed stream identity. Case-sensitive; renders as
/// `category:version-threadId` via [`fmt::Display`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamName {
    category: String,
    version: String,
    thread_id: Uuid,
}

impl StreamName {
    /// Builds a stream name, enforcing the segment invariants: `category`
    /// contains no `:`, `version` contains no `-`.
    pub fn new(
        category: impl Into<String>,
        version: impl Into<String>,
        thread_id: Uuid,
    ) -> Result<Self, StreamNameError> {
        let category = category.into();
        if category.is_empty() || category.contains(':') {
            return Err(StreamNameError::InvalidCategory(category));
        }
        let version = version.into();
        if version.is_empty() || version.contains('-') {
            return Err(StreamNameError::InvalidVersion(version));
        }
        Ok(Self {
            category,
            version,
            thread_id,
        })
    }

    /// Builds a stream name with the default `agent:v0` prefix.
    pub fn for_thread(thread_id: Uuid) -> Self {
        Self {
            category: DEFAULT_CATEGORY.to_string(),
            version: DEFAULT_VERSION.to_string(),
            thread_id,
        }
    }

    /// Parses `category:version-threadId`. The version ends at the first `-`
    /// after the colon (the version segment itself never contains `-`, while
    /// the UUID does).
    pub fn parse(s: &str) -> Result<Self, StreamNameError> {
        let (category, rest) = s
            .split_once(':')
            .ok_or_else(|| StreamNameError::Malformed(s.to_string()))?;
        let (version, thread) = rest
            .split_once('-')
            .ok_or_else(|| StreamNameError::Malformed(s.to_string()))?;
        let thread_id = Uuid::parse_str(thread)
            .map_err(|_| StreamNameError::InvalidThreadId(thread.to_string()))?;
        Self::new(category, version, thread_id)
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn thread_id(&self) -> Uuid {
        self.thread_id
    }

    /// The category segment as Message DB sees it: everything before the first
    /// `-`, i.e. `category:version`. Used for category-wide reads.
    pub fn category_prefix(&self) -> String {
        format!("{}:{}", self.category, self.version)
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.category, self.version, self.thread_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: build/parse round-trips for valid (category, version, thread) triples.
    #[test]
    fn round_trip_build_then_parse() {
        let thread_id = Uuid::new_v4();
        for (cat, ver) in [("agent", "v0"), ("agent", "v12"), ("chat.session", "beta")] {
            let name = StreamName::new(cat, ver, thread_id).unwrap();
            let parsed = StreamName::parse(&name.to_string()).unwrap();
            assert_eq!(parsed, name);
            assert_eq!(parsed.category(), cat);
            assert_eq!(parsed.version(), ver);
            assert_eq!(parsed.thread_id(), thread_id);
        }
    }

    /// **Scenario**: for_thread uses the agent:v0 defaults.
    #[test]
    fn for_thread_uses_defaults() {
        let thread_id = Uuid::new_v4();
        let name = StreamName::for_thread(thread_id);
        assert_eq!(name.category(), DEFAULT_CATEGORY);
        assert_eq!(name.version(), DEFAULT_VERSION);
        assert_eq!(name.to_string(), format!("agent:v0-{}", thread_id));
    }

    /// **Scenario**: a category containing ':' is rejected at construction.
    #[test]
    fn category_with_colon_rejected() {
        let err = StreamName::new("agent:x", "v0", Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StreamNameError::InvalidCategory(_)));
    }

    /// **Scenario**: a version containing '-' is rejected at construction.
    #[test]
    fn version_with_dash_rejected() {
        let err = StreamName::new("agent", "v-0", Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StreamNameError::InvalidVersion(_)));
    }

    /// **Scenario**: parse rejects names without a colon, without a dash, or
    /// with a non-UUID thread segment.
    #[test]
    fn parse_rejects_malformed_names() {
        assert!(matches!(
            StreamName::parse("agentv0"),
            Err(StreamNameError::Malformed(_))
        ));
        assert!(matches!(
            StreamName::parse("agent:v0"),
            Err(StreamNameError::Malformed(_))
        ));
        assert!(matches!(
            StreamName::parse("agent:v0-not-a-uuid"),
            Err(StreamNameError::InvalidThreadId(_))
        ));
    }

    /// **Scenario**: category_prefix yields the Message DB category segment.
    #[test]
    fn category_prefix_is_category_and_version() {
        let name = StreamName::for_thread(Uuid::new_v4());
        assert_eq!(name.category_prefix(), "agent:v0");
    }
}
