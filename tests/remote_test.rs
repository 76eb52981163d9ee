//! Contract loading over HTTP.

#![cfg(feature = "remote")]

use oas_gate::{load_contract_auto, load_contract_url, LoadError, Request, Validator};

const CONTRACT: &str = r#"
openapi: 3.0.3
info: { title: Remote, version: "1" }
servers:
  - url: http://localhost
paths:
  /status:
    get:
      operationId: status
      responses: { "200": { description: ok } }
"#;

#[test]
fn loads_contract_from_url() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/openapi.yaml")
        .with_status(200)
        .with_header("content-type", "application/yaml")
        .with_body(CONTRACT)
        .create();

    let contract = load_contract_auto(&format!("{}/openapi.yaml", server.url())).unwrap();
    mock.assert();

    let outcome = Validator::new(&contract)
        .validate_request(&Request::new("GET", "http://localhost/status").unwrap());
    assert!(outcome.is_valid());
}

#[test]
fn http_error_is_network_error() {
    let mut server = mockito::Server::new();
    let _mock = server.mock("GET", "/missing.yaml").with_status(404).create();

    let err = load_contract_url(&format!("{}/missing.yaml", server.url())).unwrap_err();
    assert!(matches!(err, LoadError::NetworkError { .. }));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn malformed_remote_document() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/broken.json")
        .with_status(200)
        .with_body("{ \"openapi\": ")
        .create();

    let err = load_contract_url(&format!("{}/broken.json", server.url())).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}
