//! Error types for contract loading and request/response validation.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::types::{Location, StatusPolicy};

/// Errors while loading a contract document.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML: {source}")]
    InvalidYaml {
        #[source]
        source: serde_yaml::Error,
    },

    // Contract errors (exit code 2)
    #[error("unresolved reference {reference} at {path}")]
    UnresolvedRef { path: String, reference: String },

    #[error("invalid contract at {path}: {message}")]
    InvalidContract { path: String, message: String },

    #[error("invalid pattern at {path}: {source}")]
    InvalidPattern {
        path: String,
        #[source]
        source: regex::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }

    pub(crate) fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::InvalidContract {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Kind of a validation failure.
///
/// Every kind has a stable class identifier and a default HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ServerNotFound,
    PathNotFound,
    OperationNotFound,
    InvalidContentType,
    MissingRequestBody,
    DeserializeError,
    RequiredParameterMissing,
    EmptyParameterValue,
    InvalidSchemaValue,
    ResponseNotFound,
}

impl ErrorKind {
    /// Default HTTP status for this kind.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::ServerNotFound => 400,
            ErrorKind::PathNotFound => 404,
            ErrorKind::OperationNotFound => 405,
            ErrorKind::InvalidContentType => 415,
            ErrorKind::MissingRequestBody
            | ErrorKind::DeserializeError
            | ErrorKind::RequiredParameterMissing
            | ErrorKind::EmptyParameterValue
            | ErrorKind::InvalidSchemaValue => 400,
            ErrorKind::ResponseNotFound => 500,
        }
    }

    /// Short kind name, e.g. `PathNotFound`.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::ServerNotFound => "ServerNotFound",
            ErrorKind::PathNotFound => "PathNotFound",
            ErrorKind::OperationNotFound => "OperationNotFound",
            ErrorKind::InvalidContentType => "InvalidContentType",
            ErrorKind::MissingRequestBody => "MissingRequestBody",
            ErrorKind::DeserializeError => "DeserializeError",
            ErrorKind::RequiredParameterMissing => "RequiredParameterMissing",
            ErrorKind::EmptyParameterValue => "EmptyParameterValue",
            ErrorKind::InvalidSchemaValue => "InvalidSchemaValue",
            ErrorKind::ResponseNotFound => "ResponseNotFound",
        }
    }

    /// Stable fully-qualified identifier used as `class` in the error envelope.
    pub fn class(&self) -> &'static str {
        match self {
            ErrorKind::ServerNotFound => "oas_gate::resolver::ServerNotFound",
            ErrorKind::PathNotFound => "oas_gate::resolver::PathNotFound",
            ErrorKind::OperationNotFound => "oas_gate::resolver::OperationNotFound",
            ErrorKind::InvalidContentType => "oas_gate::media::InvalidContentType",
            ErrorKind::MissingRequestBody => "oas_gate::media::MissingRequestBody",
            ErrorKind::DeserializeError => "oas_gate::media::DeserializeError",
            ErrorKind::RequiredParameterMissing => {
                "oas_gate::parameters::RequiredParameterMissing"
            }
            ErrorKind::EmptyParameterValue => "oas_gate::parameters::EmptyParameterValue",
            ErrorKind::InvalidSchemaValue => "oas_gate::unmarshal::InvalidSchemaValue",
            ErrorKind::ResponseNotFound => "oas_gate::validator::ResponseNotFound",
        }
    }

    /// True for the resolver kinds, which always end the pipeline.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            ErrorKind::ServerNotFound | ErrorKind::PathNotFound | ErrorKind::OperationNotFound
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// One step in the path from the schema root to a failing value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PathKey {
    Property(String),
    Index(usize),
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // JSON Pointer escaping (~ -> ~0, / -> ~1)
            PathKey::Property(name) => write!(f, "{}", name.replace('~', "~0").replace('/', "~1")),
            PathKey::Index(i) => write!(f, "{}", i),
        }
    }
}

/// The parameter an error originated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterRef {
    pub name: String,
    pub location: Location,
}

/// Single validation failure with its origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub kind: ErrorKind,
    /// Human-readable message, rendered as `title` in the envelope.
    pub message: String,
    /// Keys from the schema root to the failing value.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub schema_path: Vec<PathKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<ParameterRef>,
}

impl ValidationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            schema_path: Vec::new(),
            parameter: None,
        }
    }

    pub fn with_path(mut self, path: Vec<PathKey>) -> Self {
        self.schema_path = path;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, location: Location) -> Self {
        self.parameter = Some(ParameterRef {
            name: name.into(),
            location,
        });
        self
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    /// JSON Pointer (RFC 6901) to the failing value, empty for the root.
    pub fn pointer(&self) -> String {
        self.schema_path
            .iter()
            .map(|key| format!("/{}", key))
            .collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.schema_path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.pointer(), self.message)
        }
    }
}

/// Overall HTTP status for a list of errors, `None` when the list is empty.
pub fn overall_status(errors: &[ValidationError], policy: StatusPolicy) -> Option<u16> {
    match policy {
        StatusPolicy::First => errors.first().map(ValidationError::status),
        StatusPolicy::Highest => errors.iter().map(ValidationError::status).max(),
    }
}

/// One entry of the JSON error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeEntry {
    pub class: String,
    pub status: u16,
    pub title: String,
}

/// The `{"errors": [...]}` body a transport adapter renders on failure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub errors: Vec<EnvelopeEntry>,
}

impl ErrorEnvelope {
    /// Build an envelope with one entry per error, preserving order.
    pub fn from_errors(errors: &[ValidationError]) -> Self {
        Self {
            errors: errors
                .iter()
                .map(|e| EnvelopeEntry {
                    class: e.kind.class().to_string(),
                    status: e.status(),
                    title: e.message.clone(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Render as a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "errors": self.errors })
    }
}
