use thiserror::Error;

/// Failures of the named-request transport (hub, faces, TCP bridge).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to register prefix \"{prefix}\": {reason}")]
    RegistrationFailed { prefix: String, reason: String },
    #[error("interest {name} timed out")]
    Timeout { name: String },
    #[error("face is closed")]
    Closed,
    #[error("hub i/o error")]
    Io(#[from] std::io::Error),
    #[error("frame codec error")]
    Codec(#[from] serde_json::Error),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum SignError {
    #[error("cannot sign a packet without a name")]
    EmptyName,
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),
}

/// Failures while persisting or reading timestamp records.
#[derive(Error, Debug)]
pub enum MetricError {
    #[error("metric file i/o error")]
    Io(#[from] std::io::Error),
    #[error("malformed metric value on line {line_no}: {line:?}")]
    Parse { line_no: usize, line: String },
    #[error("redis error")]
    Redis(#[from] redis::RedisError),
    #[error("record json error")]
    Json(#[from] serde_json::Error),
    #[error("{got} record offered to the {expected} log")]
    RoleMismatch {
        expected: crate::records::Role,
        got: crate::records::Role,
    },
}

#[derive(Error, Debug)]
pub enum NameError {
    #[error("name must start with '/': {0:?}")]
    MissingLeadingSlash(String),
    #[error("name component contains whitespace: {0:?}")]
    Whitespace(String),
}

/// Top-level error returned by the role entry points.
#[derive(Error, Debug)]
pub enum NdnPingError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Metric(#[from] MetricError),
    #[error(transparent)]
    Name(#[from] NameError),
    #[error("i/o error")]
    Io(#[from] std::io::Error),
    #[error("report encoding error")]
    Encode(#[from] serde_json::Error),
    #[error("{0}")]
    Startup(String),
    #[error("sequence base {base} leaves no room for {cycles} cycles")]
    SequenceOverflow { base: u64, cycles: u64 },
}
