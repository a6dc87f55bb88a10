//! Application version records and their property bag

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::Serialize;

/// Tag carried by the version currently served as the production default.
pub const LATEST_TAG: &str = "latest";

/// Tag carried by a version that was rolled back.
pub const QUARANTINE_TAG: &str = "quarantine";

/// Maximum tag length accepted by the registry.
pub const MAX_TAG_LEN: usize = 128;

/// Lifecycle classification of an application version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatus {
    Unreleased,
    Released,
    TrustedRelease,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Unreleased => "UNRELEASED",
            ReleaseStatus::Released => "RELEASED",
            ReleaseStatus::TrustedRelease => "TRUSTED_RELEASE",
        }
    }

    /// Whether versions with this status take part in production tag logic.
    pub fn is_production(&self) -> bool {
        matches!(self, ReleaseStatus::Released | ReleaseStatus::TrustedRelease)
    }
}

impl FromStr for ReleaseStatus {
    type Err = std::convert::Infallible;

    /// Case-insensitive; anything unrecognised is treated as unreleased.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "RELEASED" => ReleaseStatus::Released,
            "TRUSTED_RELEASE" => ReleaseStatus::TrustedRelease,
            _ => ReleaseStatus::Unreleased,
        })
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Property keys the engine reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKey {
    /// Tag a version carried before it was tagged `latest`
    OriginalTagBeforeLatest,
    /// Tag a version carried before it was tagged `quarantine`
    OriginalTagBeforeQuarantine,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 2] = [
        PropertyKey::OriginalTagBeforeLatest,
        PropertyKey::OriginalTagBeforeQuarantine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKey::OriginalTagBeforeLatest => "original_tag_before_latest",
            PropertyKey::OriginalTagBeforeQuarantine => "original_tag_before_quarantine",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Property bag of a version.
///
/// The restore keys are typed fields; anything else the registry holds is
/// kept verbatim in `passthrough` so it survives a read-modify-write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Properties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_tag_before_latest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_tag_before_quarantine: Option<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub passthrough: IndexMap<String, String>,
}

impl Properties {
    /// A bag holding a single known key.
    pub fn single(key: PropertyKey, value: impl Into<String>) -> Self {
        let mut props = Self::default();
        props.set(key, value);
        props
    }

    pub fn get(&self, key: PropertyKey) -> Option<&str> {
        match key {
            PropertyKey::OriginalTagBeforeLatest => self.original_tag_before_latest.as_deref(),
            PropertyKey::OriginalTagBeforeQuarantine => {
                self.original_tag_before_quarantine.as_deref()
            }
        }
    }

    pub fn set(&mut self, key: PropertyKey, value: impl Into<String>) {
        let slot = match key {
            PropertyKey::OriginalTagBeforeLatest => &mut self.original_tag_before_latest,
            PropertyKey::OriginalTagBeforeQuarantine => &mut self.original_tag_before_quarantine,
        };
        *slot = Some(value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.original_tag_before_latest.is_none()
            && self.original_tag_before_quarantine.is_none()
            && self.passthrough.is_empty()
    }

    /// Upsert every entry of `other` into `self`.
    pub fn merge(&mut self, other: &Properties) {
        for key in PropertyKey::ALL {
            if let Some(value) = other.get(key) {
                self.set(key, value);
            }
        }
        for (name, value) in &other.passthrough {
            self.passthrough.insert(name.clone(), value.clone());
        }
    }

    /// Build from the registry's multi-valued representation.
    ///
    /// The first value of each key is the effective one; keys without values
    /// are dropped.
    pub fn from_wire(wire: IndexMap<String, Vec<String>>) -> Self {
        let mut props = Self::default();
        for (name, values) in wire {
            let Some(value) = values.into_iter().next() else {
                continue;
            };
            match PropertyKey::from_name(&name) {
                Some(key) => props.set(key, value),
                None => {
                    props.passthrough.insert(name, value);
                }
            }
        }
        props
    }

    pub fn to_wire(&self) -> IndexMap<String, Vec<String>> {
        let mut wire = IndexMap::new();
        for key in PropertyKey::ALL {
            if let Some(value) = self.get(key) {
                wire.insert(key.as_str().to_string(), vec![value.to_string()]);
            }
        }
        for (name, value) in &self.passthrough {
            wire.insert(name.clone(), vec![value.clone()]);
        }
        wire
    }
}

/// One released build of one application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationVersion {
    pub application_key: String,
    pub version: String,
    pub release_status: ReleaseStatus,
    pub tag: String,
    pub properties: Properties,
}

impl ApplicationVersion {
    /// A freshly created version: tag defaults to its own version string.
    pub fn new(application_key: &str, version: &str, release_status: ReleaseStatus) -> Self {
        Self {
            application_key: application_key.to_string(),
            version: version.to_string(),
            release_status,
            tag: version.to_string(),
            properties: Properties::default(),
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }

    pub fn with_property(mut self, key: PropertyKey, value: &str) -> Self {
        self.properties.set(key, value);
        self
    }

    pub fn is_latest(&self) -> bool {
        self.tag == LATEST_TAG
    }

    pub fn is_quarantined(&self) -> bool {
        self.tag == QUARANTINE_TAG
    }
}

/// Entry of a version listing.
///
/// Listings may omit status, tag or properties; `None` means the registry did
/// not include the field inline and a detail lookup is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedVersion {
    pub version: String,
    pub release_status: Option<ReleaseStatus>,
    pub tag: Option<String>,
    pub properties: Option<Properties>,
}

impl ListedVersion {
    /// Complete the entry into a full record, if nothing is missing.
    pub fn into_complete(self, application_key: &str) -> Result<ApplicationVersion, Self> {
        match (&self.release_status, &self.tag) {
            (Some(status), Some(tag)) => Ok(ApplicationVersion {
                application_key: application_key.to_string(),
                version: self.version,
                release_status: *status,
                tag: tag.clone(),
                properties: self.properties.unwrap_or_default(),
            }),
            _ => Err(self),
        }
    }
}

impl From<ApplicationVersion> for ListedVersion {
    fn from(version: ApplicationVersion) -> Self {
        Self {
            version: version.version,
            release_status: Some(version.release_status),
            tag: Some(version.tag),
            properties: Some(version.properties),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("RELEASED", ReleaseStatus::Released)]
    #[case("trusted_release", ReleaseStatus::TrustedRelease)]
    #[case("PRE_RELEASE", ReleaseStatus::Unreleased)]
    #[case("", ReleaseStatus::Unreleased)]
    fn release_status_parses_case_insensitively(
        #[case] input: &str,
        #[case] expected: ReleaseStatus,
    ) {
        assert_eq!(input.parse::<ReleaseStatus>().unwrap(), expected);
    }

    #[test]
    fn from_wire_splits_known_keys_from_passthrough() {
        let wire = IndexMap::from([
            (
                "original_tag_before_latest".to_string(),
                vec!["1.4.0".to_string(), "ignored".to_string()],
            ),
            ("owner".to_string(), vec!["team-a".to_string()]),
            ("empty".to_string(), vec![]),
        ]);

        let props = Properties::from_wire(wire);

        assert_eq!(props.get(PropertyKey::OriginalTagBeforeLatest), Some("1.4.0"));
        assert_eq!(props.get(PropertyKey::OriginalTagBeforeQuarantine), None);
        assert_eq!(
            props.passthrough,
            IndexMap::from([("owner".to_string(), "team-a".to_string())])
        );
    }

    #[test]
    fn to_wire_emits_single_value_arrays() {
        let mut props = Properties::single(PropertyKey::OriginalTagBeforeQuarantine, "latest");
        props.passthrough.insert("owner".to_string(), "team-a".to_string());

        let wire = props.to_wire();

        assert_eq!(
            wire.get("original_tag_before_quarantine"),
            Some(&vec!["latest".to_string()])
        );
        assert_eq!(wire.get("owner"), Some(&vec!["team-a".to_string()]));
        assert_eq!(wire.len(), 2);
    }

    #[test]
    fn merge_overwrites_only_present_entries() {
        let mut props = Properties::single(PropertyKey::OriginalTagBeforeLatest, "1.0.0");
        props.merge(&Properties::single(
            PropertyKey::OriginalTagBeforeQuarantine,
            "latest",
        ));

        assert_eq!(props.get(PropertyKey::OriginalTagBeforeLatest), Some("1.0.0"));
        assert_eq!(
            props.get(PropertyKey::OriginalTagBeforeQuarantine),
            Some("latest")
        );
    }

    #[test]
    fn listed_version_without_status_is_incomplete() {
        let listed = ListedVersion {
            version: "1.0.0".to_string(),
            release_status: None,
            tag: Some("1.0.0".to_string()),
            properties: None,
        };

        assert!(listed.into_complete("app").is_err());
    }

    #[test]
    fn new_version_is_tagged_with_itself() {
        let version = ApplicationVersion::new("app", "1.2.3", ReleaseStatus::Released);
        assert_eq!(version.tag, "1.2.3");
        assert!(!version.is_latest());
    }
}
