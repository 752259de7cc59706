mod name;

pub use name::Name;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ─── Protocol defaults ───────────────────────────────────────────

/// Interest lifetime used on both hops unless overridden.
pub const DEFAULT_LIFETIME: Duration = Duration::from_millis(1000);

/// Freshness period stamped on every response.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(10);

// ─── Interest ────────────────────────────────────────────────────

/// A named request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    pub name: Name,
    pub lifetime_ms: u64,
    pub must_be_fresh: bool,
    pub nonce: u32,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            lifetime_ms: DEFAULT_LIFETIME.as_millis() as u64,
            must_be_fresh: false,
            nonce: rand::random(),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime_ms = lifetime.as_millis() as u64;
        self
    }

    pub fn with_must_be_fresh(mut self, must_be_fresh: bool) -> Self {
        self.must_be_fresh = must_be_fresh;
        self
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.lifetime_ms)
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}?lifetime={}ms&mustBeFresh={}&nonce={:08x}",
            self.name, self.lifetime_ms, self.must_be_fresh, self.nonce
        )
    }
}

// ─── Data ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    DigestSha256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub kind: SignatureKind,
    /// Hex-encoded signature value.
    pub value: String,
}

/// A named response. Built fresh for every request, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    pub name: Name,
    pub freshness_ms: u64,
    pub content: Vec<u8>,
    pub signature: Option<Signature>,
}

impl Data {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            freshness_ms: DEFAULT_FRESHNESS.as_millis() as u64,
            content: Vec::new(),
            signature: None,
        }
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness_ms = freshness.as_millis() as u64;
        self
    }

    pub fn with_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = content.into();
        self
    }

    /// Bytes covered by the signature: name, freshness and content.
    pub fn signed_portion(&self) -> Vec<u8> {
        let name = self.name.to_string();
        let mut buf = Vec::with_capacity(name.len() + 8 + self.content.len());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&self.freshness_ms.to_be_bytes());
        buf.extend_from_slice(&self.content);
        buf
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (freshness={}ms, {} bytes, {})",
            self.name,
            self.freshness_ms,
            self.content.len(),
            if self.signature.is_some() { "signed" } else { "unsigned" }
        )
    }
}

// ─── Hub frames ──────────────────────────────────────────────────

/// Everything exchanged between a face and the hub, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Register { prefix: Name },
    RegisterOk { prefix: Name },
    RegisterFailed { prefix: Name, reason: String },
    Interest(Interest),
    Data(Data),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_builder_sets_lifetime_and_freshness_flag() {
        let interest = Interest::new("/serverA/1".parse().unwrap())
            .with_lifetime(Duration::from_millis(250))
            .with_must_be_fresh(true);
        assert_eq!(interest.lifetime(), Duration::from_millis(250));
        assert!(interest.must_be_fresh);
        assert!(interest.to_string().starts_with("/serverA/1?lifetime=250ms"));
    }

    #[test]
    fn frames_are_tagged_json() {
        let frame = Frame::Register {
            prefix: "/serverA".parse().unwrap(),
        };
        let line = serde_json::to_string(&frame).unwrap();
        assert_eq!(line, r#"{"type":"register","prefix":"/serverA"}"#);

        let data = Data::new("/serverA/1/testApp/v=5".parse().unwrap()).with_content("HELLO KITTY");
        let line = serde_json::to_string(&Frame::Data(data.clone())).unwrap();
        assert_eq!(serde_json::from_str::<Frame>(&line).unwrap(), Frame::Data(data));
    }
}
