//! Request and response validation pipeline.
//!
//! A request goes through resolution, body negotiation, parameter extraction
//! and body unmarshalling. Resolution failures stop the pipeline; everything
//! after resolution is collected into one ordered error list.

use serde_json::Value;

use crate::contract::{Contract, MediaType};
use crate::error::{overall_status, ErrorEnvelope, ErrorKind, ValidationError};
use crate::media::{decode_body, negotiate};
use crate::parameters::{extract_parameters, RequestParameters};
use crate::request::{Request, ResponseProbe};
use crate::resolver::{resolve, Resolution};
use crate::types::{Direction, StatusPolicy, ValidateOptions};
use crate::unmarshal::Unmarshaller;

/// Validates requests and responses against one contract.
///
/// Holds only shared references, so one validator can serve many threads.
#[derive(Debug, Clone)]
pub struct Validator<'c> {
    contract: &'c Contract,
    options: ValidateOptions,
}

/// Result of validating a request.
#[derive(Debug, Clone)]
pub struct RequestOutcome<'c> {
    resolution: Option<Resolution<'c>>,
    parameters: Option<RequestParameters>,
    body: Option<Value>,
    errors: Vec<ValidationError>,
    policy: StatusPolicy,
}

impl<'c> RequestOutcome<'c> {
    fn failed(error: ValidationError, policy: StatusPolicy) -> Self {
        Self {
            resolution: None,
            parameters: None,
            body: None,
            errors: vec![error],
            policy,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// The matched server, path and operation. `None` when resolution failed.
    pub fn resolution(&self) -> Option<&Resolution<'c>> {
        self.resolution.as_ref()
    }

    /// Casted parameters, present when every parameter was valid even if
    /// the body was not.
    pub fn parameters(&self) -> Option<&RequestParameters> {
        self.parameters.as_ref()
    }

    /// Casted body, present when the body was declared, sent and valid.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// HTTP status for the error envelope; `None` when valid.
    pub fn status(&self) -> Option<u16> {
        overall_status(&self.errors, self.policy)
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::from_errors(&self.errors)
    }
}

/// Result of validating a response.
#[derive(Debug, Clone)]
pub struct ResponseOutcome {
    data: Option<Value>,
    errors: Vec<ValidationError>,
    policy: StatusPolicy,
}

impl ResponseOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Casted response body, when one was declared and sent.
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn status(&self) -> Option<u16> {
        overall_status(&self.errors, self.policy)
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::from_errors(&self.errors)
    }
}

impl<'c> Validator<'c> {
    pub fn new(contract: &'c Contract) -> Self {
        Self {
            contract,
            options: ValidateOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ValidateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn contract(&self) -> &'c Contract {
        self.contract
    }

    fn unmarshaller(&self, direction: Direction) -> Unmarshaller<'c> {
        Unmarshaller::new(&self.contract.schemas, direction).max_depth(self.options.max_depth)
    }

    /// Validate an inbound request.
    pub fn validate_request(&self, request: &Request) -> RequestOutcome<'c> {
        let policy = self.options.status_policy;
        let resolution = match resolve(self.contract, request) {
            Ok(resolution) => resolution,
            Err(error) => return RequestOutcome::failed(error, policy),
        };
        let operation = resolution.operation;
        if operation.deprecated {
            tracing::warn!(
                method = %resolution.method,
                template = resolution.template,
                "request to deprecated operation"
            );
        }

        let mut errors = Vec::new();

        // Negotiate before parameters so a content type mismatch leads the list.
        let mut media: Option<(&str, &MediaType)> = None;
        if let Some(request_body) = &operation.request_body {
            if request.has_body() {
                match negotiate(&request_body.content, request.content_type()) {
                    Ok(found) => media = Some(found),
                    Err(error) if request_body.required => {
                        tracing::debug!(%error, "required request body not acceptable");
                        return RequestOutcome {
                            resolution: Some(resolution),
                            ..RequestOutcome::failed(error, policy)
                        };
                    }
                    Err(error) => errors.push(error),
                }
            } else if request_body.required {
                errors.push(ValidationError::new(
                    ErrorKind::MissingRequestBody,
                    "Missing required request body",
                ));
            }
        }

        let unmarshaller = self.unmarshaller(Direction::Request);
        let params = resolution.path_item.effective_parameters(operation);
        let parameters = match extract_parameters(
            &params,
            request,
            &resolution.path_variables,
            &unmarshaller,
        ) {
            Ok(parameters) => Some(parameters),
            Err(errs) => {
                tracing::debug!(count = errs.len(), "parameter errors");
                errors.extend(errs);
                None
            }
        };

        let mut body = None;
        if let (Some((mimetype, media)), Some(bytes)) = (media, request.body.as_deref()) {
            match self.unmarshal_body(&unmarshaller, mimetype, media, bytes) {
                Ok(value) => body = Some(value),
                Err(errs) => {
                    tracing::debug!(count = errs.len(), mimetype, "request body errors");
                    errors.extend(errs);
                }
            }
        }

        tracing::debug!(
            method = %resolution.method,
            template = resolution.template,
            errors = errors.len(),
            "request validated"
        );
        RequestOutcome {
            resolution: Some(resolution),
            parameters,
            body,
            errors,
            policy,
        }
    }

    /// Validate a handler response for an already resolved request.
    pub fn validate_response(
        &self,
        resolution: &Resolution<'_>,
        response: &ResponseProbe,
    ) -> ResponseOutcome {
        let policy = self.options.status_policy;
        let outcome = |data, errors| ResponseOutcome {
            data,
            errors,
            policy,
        };

        let Some((key, declared)) = resolution.operation.response_for(response.status) else {
            return outcome(
                None,
                vec![ValidationError::new(
                    ErrorKind::ResponseNotFound,
                    format!("Unknown response http status: {}", response.status),
                )],
            );
        };
        if declared.content.is_empty()
            || (!response.has_body() && response.content_type.is_none())
        {
            tracing::debug!(status = response.status, key, "response without content");
            return outcome(None, Vec::new());
        }

        let (mimetype, media) =
            match negotiate(&declared.content, response.content_type.as_deref()) {
                Ok(found) => found,
                Err(error) => return outcome(None, vec![error]),
            };
        let Some(bytes) = response.body.as_deref().filter(|b| !b.is_empty()) else {
            return outcome(None, Vec::new());
        };

        let unmarshaller = self.unmarshaller(Direction::Response);
        match self.unmarshal_body(&unmarshaller, mimetype, media, bytes) {
            Ok(data) => outcome(Some(data), Vec::new()),
            Err(errors) => {
                tracing::debug!(status = response.status, count = errors.len(), "response errors");
                outcome(None, errors)
            }
        }
    }

    /// Resolve `request`, then validate `response` against it.
    pub fn validate_response_for(
        &self,
        request: &Request,
        response: &ResponseProbe,
    ) -> ResponseOutcome {
        match resolve(self.contract, request) {
            Ok(resolution) => self.validate_response(&resolution, response),
            Err(error) => ResponseOutcome {
                data: None,
                errors: vec![error],
                policy: self.options.status_policy,
            },
        }
    }

    fn unmarshal_body(
        &self,
        unmarshaller: &Unmarshaller<'c>,
        mimetype: &str,
        media: &MediaType,
        bytes: &[u8],
    ) -> Result<Value, Vec<ValidationError>> {
        let decoded = decode_body(mimetype, bytes).map_err(|e| vec![e])?;
        match media.schema {
            Some(schema) => unmarshaller.unmarshal(schema, &decoded.value, decoded.source),
            None => Ok(decoded.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_contract_str;
    use serde_json::json;

    const CONTRACT: &str = r#"
openapi: 3.0.3
info: { title: Pets, version: "1" }
servers:
  - url: http://localhost
paths:
  /pets:
    post:
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              required: [name]
              properties:
                name: { type: string }
                age: { type: integer, minimum: 0 }
      responses:
        "201":
          description: created
          content:
            application/json:
              schema:
                type: object
                required: [id]
                properties:
                  id: { type: integer }
        "204": { description: nothing }
  /notes:
    put:
      parameters:
        - name: draft
          in: query
          schema: { type: boolean }
      requestBody:
        content:
          text/plain:
            schema: { type: string, maxLength: 5 }
      responses:
        default: { description: any }
"#;

    fn contract() -> Contract {
        load_contract_str(CONTRACT).unwrap()
    }

    #[test]
    fn valid_request_with_body() {
        let c = contract();
        let req = Request::new("POST", "http://localhost/pets")
            .unwrap()
            .with_json(&json!({ "name": "Rex", "age": 3 }));
        let outcome = Validator::new(&c).validate_request(&req);
        assert!(outcome.is_valid(), "{:?}", outcome.errors());
        assert_eq!(outcome.body(), Some(&json!({ "name": "Rex", "age": 3 })));
        assert!(outcome.parameters().unwrap().is_empty());
        assert_eq!(outcome.status(), None);
    }

    #[test]
    fn missing_required_body() {
        let c = contract();
        let req = Request::new("POST", "http://localhost/pets").unwrap();
        let outcome = Validator::new(&c).validate_request(&req);
        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.errors()[0].kind, ErrorKind::MissingRequestBody);
    }

    #[test]
    fn wrong_content_type_for_required_body_is_terminal() {
        let c = contract();
        let req = Request::new("POST", "http://localhost/pets")
            .unwrap()
            .with_header("Content-Type", "text/plain")
            .with_body("Rex");
        let outcome = Validator::new(&c).validate_request(&req);
        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.status(), Some(415));
        assert!(outcome.resolution().is_some());
    }

    #[test]
    fn wrong_content_type_for_optional_body_still_checks_parameters() {
        let c = contract();
        let req = Request::new("PUT", "http://localhost/notes?draft=maybe")
            .unwrap()
            .with_json(&json!({}));
        let outcome = Validator::new(&c).validate_request(&req);
        let kinds: Vec<_> = outcome.errors().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![ErrorKind::InvalidContentType, ErrorKind::InvalidSchemaValue]
        );
    }

    #[test]
    fn text_body_is_cast_lexically() {
        let c = contract();
        let req = Request::new("PUT", "http://localhost/notes")
            .unwrap()
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body("too long");
        let outcome = Validator::new(&c).validate_request(&req);
        assert_eq!(outcome.errors().len(), 1);
        assert!(outcome.errors()[0].message.contains("at most 5 characters"));

        let req = Request::new("PUT", "http://localhost/notes").unwrap();
        assert!(Validator::new(&c).validate_request(&req).is_valid());
    }

    #[test]
    fn body_errors_are_collected() {
        let c = contract();
        let req = Request::new("POST", "http://localhost/pets")
            .unwrap()
            .with_json(&json!({ "age": -1 }));
        let outcome = Validator::new(&c).validate_request(&req);
        assert_eq!(outcome.errors().len(), 2);
        assert!(outcome.body().is_none());
    }

    #[test]
    fn malformed_json_body() {
        let c = contract();
        let req = Request::new("POST", "http://localhost/pets")
            .unwrap()
            .with_header("Content-Type", "application/json")
            .with_body("{");
        let outcome = Validator::new(&c).validate_request(&req);
        assert_eq!(outcome.errors()[0].kind, ErrorKind::DeserializeError);
        assert_eq!(outcome.status(), Some(400));
    }

    #[test]
    fn response_checks() {
        let c = contract();
        let validator = Validator::new(&c);
        let req = Request::new("POST", "http://localhost/pets").unwrap();

        let ok = validator.validate_response_for(
            &req,
            &ResponseProbe::new(201).with_json(&json!({ "id": 1 })),
        );
        assert!(ok.is_valid());
        assert_eq!(ok.data(), Some(&json!({ "id": 1 })));

        let bad = validator
            .validate_response_for(&req, &ResponseProbe::new(201).with_json(&json!({})));
        assert_eq!(bad.errors()[0].message, "Missing required property: id");

        let empty = validator.validate_response_for(&req, &ResponseProbe::new(204));
        assert!(empty.is_valid());

        let unknown = validator.validate_response_for(&req, &ResponseProbe::new(418));
        assert_eq!(unknown.errors()[0].kind, ErrorKind::ResponseNotFound);
        assert_eq!(unknown.errors()[0].message, "Unknown response http status: 418");
        assert_eq!(unknown.status(), Some(500));
    }

    #[test]
    fn response_content_type_mismatch() {
        let c = contract();
        let req = Request::new("POST", "http://localhost/pets").unwrap();
        let outcome = Validator::new(&c).validate_response_for(
            &req,
            &ResponseProbe::new(201)
                .with_content_type("text/html")
                .with_body("success"),
        );
        assert_eq!(
            outcome.envelope().to_json(),
            json!({ "errors": [{
                "class": "oas_gate::media::InvalidContentType",
                "status": 415,
                "title": "Content for following mimetype not found: text/html"
            }]})
        );
    }

    #[test]
    fn status_policy_is_applied() {
        let c = contract();
        let req = Request::new("PUT", "http://localhost/notes?draft=maybe")
            .unwrap()
            .with_json(&json!({}));
        let mut first = Validator::new(&c).validate_request(&req);
        let mut highest = Validator::new(&c)
            .with_options(ValidateOptions::new().status_policy(StatusPolicy::Highest))
            .validate_request(&req);

        // negotiation errors lead the list, so both policies agree here
        let kinds: Vec<ErrorKind> = first.errors().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![ErrorKind::InvalidContentType, ErrorKind::InvalidSchemaValue]
        );
        assert_eq!(first.status(), Some(415));
        assert_eq!(highest.status(), Some(415));

        // with the 400 in front the configured policy decides
        first.errors.rotate_left(1);
        highest.errors.rotate_left(1);
        assert_eq!(first.status(), Some(400));
        assert_eq!(highest.status(), Some(415));
        assert_eq!(first.envelope().errors[0].status, 400);
        assert_eq!(highest.envelope().errors[0].status, 400);
    }
}
