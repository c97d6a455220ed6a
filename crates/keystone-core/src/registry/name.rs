use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::kernel::constants;
use crate::kernel::error::{Error, Result};

/// Identifier of a deployable artifact: `group/artifact/version/type`.
///
/// Any field except the artifact id may be left out, in which case the
/// artifact is *unresolved* and acts as a pattern: see [`Artifact::matches`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Artifact {
    pub group_id: Option<String>,
    pub artifact_id: String,
    pub version: Option<Version>,
    pub kind: Option<String>,
}

impl Artifact {
    /// Creates a fully resolved artifact.
    pub fn new(group_id: &str, artifact_id: &str, version: &str, kind: &str) -> Result<Self> {
        Ok(Self {
            group_id: Some(group_id.to_string()),
            artifact_id: artifact_id.to_string(),
            version: Some(parse_version(version)?),
            kind: Some(kind.to_string()),
        })
    }

    /// Creates an artifact pattern that only names the artifact id.
    pub fn named(artifact_id: &str) -> Self {
        Self {
            group_id: None,
            artifact_id: artifact_id.to_string(),
            version: None,
            kind: None,
        }
    }

    /// Whether every field is present.
    pub fn is_resolved(&self) -> bool {
        self.group_id.is_some() && self.version.is_some() && self.kind.is_some()
    }

    /// Whether `other` satisfies this artifact used as a pattern.
    ///
    /// Missing fields on `self` match anything.
    pub fn matches(&self, other: &Artifact) -> bool {
        fn field<T: PartialEq>(pattern: &Option<T>, value: &Option<T>) -> bool {
            match pattern {
                None => true,
                Some(p) => value.as_ref() == Some(p),
            }
        }
        self.artifact_id == other.artifact_id
            && field(&self.group_id, &other.group_id)
            && field(&self.version, &other.version)
            && field(&self.kind, &other.kind)
    }

    /// The same artifact with the version removed.
    pub fn without_version(&self) -> Self {
        Self { version: None, ..self.clone() }
    }
}

/// Parses a version leniently: `1`, `1.2` and `1.2.3` are all accepted.
pub fn parse_version(version: &str) -> Result<Version> {
    let padded = match version.matches('.').count() {
        0 if !version.contains('-') => format!("{}.0.0", version),
        1 if !version.contains('-') => format!("{}.0", version),
        _ => version.to_string(),
    };
    Version::parse(&padded).map_err(|e| Error::Other(format!("Invalid version '{}': {}", version, e)))
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.group_id.as_deref().unwrap_or(""),
            self.artifact_id,
            self.version.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            self.kind.as_deref().unwrap_or("")
        )
    }
}

impl FromStr for Artifact {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 4 {
            return Err(Error::Other(format!(
                "Invalid artifact '{}': expected group/artifact/version/type",
                s
            )));
        }
        if parts[1].is_empty() {
            return Err(Error::Other(format!("Invalid artifact '{}': artifact id is empty", s)));
        }
        let opt = |p: &str| if p.is_empty() { None } else { Some(p.to_string()) };
        let version = if parts[2].is_empty() { None } else { Some(parse_version(parts[2])?) };
        Ok(Self {
            group_id: opt(parts[0]),
            artifact_id: parts[1].to_string(),
            version,
            kind: opt(parts[3]),
        })
    }
}

impl TryFrom<String> for Artifact {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Artifact> for String {
    fn from(value: Artifact) -> Self {
        value.to_string()
    }
}

/// Identity of a registered component.
///
/// A component is named by the artifact of its owning configuration plus a
/// set of name properties (`name`, `kind`, ...). The derived ordering (artifact
/// fields first, then properties) is the kernel's deterministic tie-break when
/// several candidates satisfy a single-valued reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentName {
    pub artifact: Artifact,
    pub properties: BTreeMap<String, String>,
}

impl ComponentName {
    /// Creates a name from an artifact and arbitrary name properties.
    pub fn with_properties<I, K, V>(artifact: Artifact, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            artifact,
            properties: properties.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Creates the usual `name`/`kind` pair.
    pub fn new(artifact: Artifact, name: &str, kind: &str) -> Self {
        Self::with_properties(artifact, [(constants::NAME_KEY, name), (constants::KIND_KEY, kind)])
    }

    /// Name of the component representing the configuration `id`.
    pub fn configuration(id: &Artifact) -> Self {
        Self::with_properties(
            id.clone(),
            [
                (constants::CONFIGURATION_NAME_KEY, id.to_string()),
                (constants::KIND_KEY, constants::CONFIGURATION_KIND.to_string()),
            ],
        )
    }

    /// Short name property, if any.
    pub fn short_name(&self) -> Option<&str> {
        self.properties.get(constants::NAME_KEY).map(String::as_str)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?", self.artifact)?;
        let mut first = true;
        for (key, value) in &self.properties {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for ComponentName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (artifact, props) = s
            .split_once('?')
            .ok_or_else(|| Error::Other(format!("Invalid component name '{}': missing '?'", s)))?;
        let artifact = artifact.parse()?;
        let mut properties = BTreeMap::new();
        for pair in props.split(',').filter(|p| !p.is_empty()) {
            // configurationName values contain '/', but never '=' or ','
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Other(format!("Invalid name property '{}' in '{}'", pair, s)))?;
            properties.insert(key.to_string(), value.to_string());
        }
        Ok(Self { artifact, properties })
    }
}

impl TryFrom<String> for ComponentName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ComponentName> for String {
    fn from(value: ComponentName) -> Self {
        value.to_string()
    }
}
