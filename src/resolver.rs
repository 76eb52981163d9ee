//! Request resolution: server, then path template, then operation.
//!
//! Each stage fails with its own error kind and a failure stops the stages
//! after it.

use indexmap::IndexMap;
use percent_encoding::percent_decode_str;

use crate::contract::{Contract, Operation, PathItem, PathTemplate, Segment, Server};
use crate::error::{ErrorKind, ValidationError};
use crate::request::Request;
use crate::types::Method;

/// A request mapped onto the contract.
#[derive(Debug, Clone)]
pub struct Resolution<'c> {
    pub server: &'c Server,
    pub server_variables: IndexMap<String, String>,
    pub template: &'c str,
    pub path_item: &'c PathItem,
    pub method: Method,
    pub operation: &'c Operation,
    /// Decoded values bound to `{name}` segments.
    pub path_variables: IndexMap<String, String>,
}

/// Resolve a request against a contract.
///
/// # Errors
///
/// Returns exactly one `ServerNotFound`, `PathNotFound` or
/// `OperationNotFound` error.
pub fn resolve<'c>(
    contract: &'c Contract,
    request: &Request,
) -> Result<Resolution<'c>, ValidationError> {
    resolve_parts(
        contract,
        &request.method,
        &request.scheme,
        &request.host,
        &request.path,
    )
}

/// Resolve from separate URL parts. See [`resolve`].
pub fn resolve_parts<'c>(
    contract: &'c Contract,
    method: &str,
    scheme: &str,
    host: &str,
    path: &str,
) -> Result<Resolution<'c>, ValidationError> {
    let url = format!("{}://{}{}", scheme, host, path);

    let servers: Vec<_> = contract
        .servers
        .iter()
        .filter_map(|server| server.match_url(scheme, host, path).map(|m| (server, m)))
        .collect();
    if servers.is_empty() {
        tracing::debug!(%url, "no server matched");
        return Err(ValidationError::new(
            ErrorKind::ServerNotFound,
            format!("Server not found for {}", url),
        ));
    }

    for (server, server_match) in servers {
        let mut candidates: Vec<_> = contract
            .paths
            .iter()
            .filter_map(|(template, item)| {
                match_template(&item.template, &server_match.remainder)
                    .map(|vars| (template.as_str(), item, vars))
            })
            .collect();
        if candidates.is_empty() {
            continue;
        }
        // Most specific first; the sort is stable so declaration order breaks ties.
        candidates.sort_by_key(|(_, item, _)| item.template.variable_count());

        let parsed = method.parse::<Method>().ok();
        let found = parsed.and_then(|m| {
            candidates
                .into_iter()
                .find_map(|(template, item, vars)| {
                    item.operations
                        .get(&m)
                        .map(|operation| (template, item, operation, vars))
                })
                .map(|found| (m, found))
        });

        return match found {
            Some((method, (template, path_item, operation, path_variables))) => {
                tracing::debug!(%url, %method, template, server = %server.url, "request resolved");
                Ok(Resolution {
                    server,
                    server_variables: server_match.variables,
                    template,
                    path_item,
                    method,
                    operation,
                    path_variables,
                })
            }
            None => {
                tracing::debug!(%url, method, "no operation for method");
                Err(ValidationError::new(
                    ErrorKind::OperationNotFound,
                    format!(
                        "Operation {} not found for {}",
                        method.to_ascii_lowercase(),
                        url
                    ),
                ))
            }
        };
    }

    tracing::debug!(%url, "no path template matched");
    Err(ValidationError::new(
        ErrorKind::PathNotFound,
        format!("Path not found for {}", url),
    ))
}

/// Match a concrete path against a template, binding variables.
///
/// Literal segments must be equal after percent-decoding; variable segments
/// accept any non-empty segment.
pub fn match_template(template: &PathTemplate, path: &str) -> Option<IndexMap<String, String>> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() != template.segments.len() {
        return None;
    }

    let mut variables = IndexMap::new();
    for (segment, part) in template.segments.iter().zip(parts) {
        let decoded = percent_decode_str(part).decode_utf8_lossy();
        match segment {
            Segment::Literal(literal) => {
                if *literal != decoded {
                    return None;
                }
            }
            Segment::Variable(name) => {
                if decoded.is_empty() {
                    return None;
                }
                variables.insert(name.clone(), decoded.into_owned());
            }
        }
    }
    Some(variables)
}
