//! OpenAPI Request Gate
//!
//! Validates HTTP requests and responses against an OpenAPI 3 contract.
//!
//! A request is resolved to a server, path template and operation, its
//! parameters and body are cast to the types the contract declares, and
//! every problem found is reported as an ordered list of errors that maps
//! onto an HTTP error envelope.
//!
//! # Example
//!
//! ```
//! use oas_gate::{load_contract_str, Request, Validator};
//! use serde_json::json;
//!
//! let contract = load_contract_str(r#"
//! openapi: 3.0.3
//! info: { title: Browse, version: "1" }
//! servers:
//!   - url: http://localhost
//! paths:
//!   /browse/{id}:
//!     get:
//!       parameters:
//!         - { name: id, in: path, required: true, schema: { type: integer } }
//!       responses:
//!         "200": { description: ok }
//! "#).unwrap();
//!
//! let validator = Validator::new(&contract);
//!
//! let ok = validator.validate_request(&Request::new("GET", "http://localhost/browse/12").unwrap());
//! assert!(ok.is_valid());
//! assert_eq!(ok.parameters().unwrap().path["id"], json!(12));
//!
//! let bad = validator.validate_request(&Request::new("POST", "http://localhost/browse/12").unwrap());
//! assert_eq!(bad.status(), Some(405));
//! ```
//!
//! # Error Kinds
//!
//! | Kind | Status | Stage |
//! |------|--------|-------|
//! | `ServerNotFound` | 400 | resolution |
//! | `PathNotFound` | 404 | resolution |
//! | `OperationNotFound` | 405 | resolution |
//! | `InvalidContentType` | 415 | body negotiation |
//! | `MissingRequestBody` | 400 | body negotiation |
//! | `DeserializeError` | 400 | body decoding |
//! | `RequiredParameterMissing` | 400 | parameters |
//! | `EmptyParameterValue` | 400 | parameters |
//! | `InvalidSchemaValue` | 400 | parameters and bodies |
//! | `ResponseNotFound` | 500 | response lookup |
//!
//! Resolution errors stop validation. Everything after resolution is
//! collected, so one request can report several problems at once.

mod contract;
mod error;
mod linter;
mod loader;
mod media;
mod parameters;
mod request;
mod resolver;
mod types;
mod unmarshal;
mod validator;

pub use contract::{
    Additional, ArrayRules, Contract, MediaType, NumberRules, ObjectRules, Operation, Parameter,
    PathItem, PathTemplate, RequestBody, Response, Schema, SchemaArena, SchemaId, SchemaKind,
    Segment, Server, ServerMatch, ServerVariable, StringRules, Style,
};
pub use error::{
    overall_status, EnvelopeEntry, ErrorEnvelope, ErrorKind, LoadError, ParameterRef, PathKey,
    ValidationError,
};
pub use linter::{lint, lint_file, Diagnostic, FileResult, FileStatus, LintResult, Severity};
pub use loader::{
    build_contract, is_url, load_contract, load_contract_auto, load_contract_str, load_document,
    load_document_str, navigate_fragment,
};
pub use media::{decode_body, essence, find_media, is_json, negotiate, DecodedBody};
pub use parameters::{extract_parameters, RequestParameters};
pub use request::{Request, ResponseProbe};
pub use resolver::{match_template, resolve, resolve_parts, Resolution};
pub use types::{
    json_type_name, Direction, Location, Method, StatusPolicy, ValidateOptions, DEFAULT_MAX_DEPTH,
};
pub use unmarshal::{Source, Unmarshaller};
pub use validator::{RequestOutcome, ResponseOutcome, Validator};

#[cfg(feature = "remote")]
pub use loader::load_contract_url;
