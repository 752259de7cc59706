use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::NameError;

/// Prefix of the version component appended to response names.
const VERSION_MARKER: &str = "v=";

/// A hierarchical name, written in URI form as `/a/b/c`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Name {
    components: Vec<String>,
}

impl Name {
    /// The empty name `/`, which is a prefix of every name.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn append(mut self, component: impl Into<String>) -> Self {
        self.components.push(component.into());
        self
    }

    pub fn append_number(self, n: u64) -> Self {
        self.append(n.to_string())
    }

    pub fn append_version(self, version: u64) -> Self {
        self.append(format!("{VERSION_MARKER}{version}"))
    }

    /// Appends the current UNIX time in milliseconds as the version.
    pub fn append_version_now(self) -> Self {
        let ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.append_version(ms)
    }

    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|(a, b)| a == b)
    }

    /// The trailing component parsed as a sequence number, if it is one.
    pub fn last_number(&self) -> Option<u64> {
        self.components.last()?.parse().ok()
    }

    pub fn version(&self) -> Option<u64> {
        self.components
            .last()?
            .strip_prefix(VERSION_MARKER)?
            .parse()
            .ok()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for c in &self.components {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let uri = uri.trim();
        if !uri.starts_with('/') {
            return Err(NameError::MissingLeadingSlash(uri.to_owned()));
        }
        let components: Vec<String> = uri
            .split('/')
            .filter(|c| !c.is_empty())
            .map(str::to_owned)
            .collect();
        if let Some(bad) = components.iter().find(|c| c.chars().any(char::is_whitespace)) {
            return Err(NameError::Whitespace(bad.clone()));
        }
        Ok(Self { components })
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.to_string()
    }
}

impl TryFrom<String> for Name {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_uri_form() {
        let name: Name = "/serverB//interest1/".parse().unwrap();
        assert_eq!(name.len(), 2);
        assert_eq!(name.to_string(), "/serverB/interest1");
        assert_eq!(Name::root().to_string(), "/");
    }

    #[test]
    fn rejects_relative_names() {
        assert!(matches!(
            "serverA".parse::<Name>(),
            Err(NameError::MissingLeadingSlash(_))
        ));
        assert!("/server A".parse::<Name>().is_err());
    }

    #[test]
    fn prefix_matching_is_component_wise() {
        let prefix: Name = "/serverA".parse().unwrap();
        let full: Name = "/serverA/17".parse().unwrap();
        let lookalike: Name = "/serverAB/17".parse().unwrap();
        assert!(prefix.is_prefix_of(&full));
        assert!(!prefix.is_prefix_of(&lookalike));
        assert!(Name::root().is_prefix_of(&prefix));
        assert!(!full.is_prefix_of(&prefix));
    }

    #[test]
    fn response_name_keeps_request_as_prefix() {
        let request: Name = "/serverB/1000".parse().unwrap();
        assert_eq!(request.last_number(), Some(1000));

        let response = request.clone().append("testApp").append_version(42);
        assert!(request.is_prefix_of(&response));
        assert_eq!(response.version(), Some(42));
        assert_eq!(response.last_number(), None);
    }

    #[test]
    fn serializes_as_uri_string() {
        let name: Name = "/a/b".parse().unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"/a/b\"");
        let back: Name = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }
}
