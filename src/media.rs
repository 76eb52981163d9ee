//! Content negotiation and body decoding.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::contract::MediaType;
use crate::error::{ErrorKind, ValidationError};
use crate::unmarshal::Source;

/// Media type without parameters, lowercased: `Text/HTML; charset=utf-8`
/// becomes `text/html`.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Find the media entry declared for a content type.
///
/// Matching is exact on the media type essence; there is no wildcard
/// negotiation.
///
/// # Errors
///
/// Returns `InvalidContentType` naming the unmatched mimetype.
pub fn find_media<'a>(
    content: &'a IndexMap<String, MediaType>,
    content_type: &str,
) -> Result<(&'a str, &'a MediaType), ValidationError> {
    let wanted = essence(content_type);
    content
        .iter()
        .find(|(declared, _)| essence(declared) == wanted)
        .map(|(declared, media)| (declared.as_str(), media))
        .ok_or_else(|| {
            ValidationError::new(
                ErrorKind::InvalidContentType,
                format!("Content for following mimetype not found: {}", wanted),
            )
        })
}

/// Negotiate for a body whose content type may be absent.
///
/// Without a content type the single declared media type is assumed; with
/// several declared the request is ambiguous and rejected.
pub fn negotiate<'a>(
    content: &'a IndexMap<String, MediaType>,
    content_type: Option<&str>,
) -> Result<(&'a str, &'a MediaType), ValidationError> {
    match content_type {
        Some(ct) => find_media(content, ct),
        None => content
            .iter()
            .next()
            .filter(|_| content.len() == 1)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| {
                ValidationError::new(
                    ErrorKind::InvalidContentType,
                    "Content for following mimetype not found: none",
                )
            }),
    }
}

/// True for `application/json` and structured `+json` suffixes.
pub fn is_json(mimetype: &str) -> bool {
    let mimetype = essence(mimetype);
    mimetype == "application/json" || mimetype.ends_with("+json")
}

/// A decoded body ready for the unmarshaller.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBody {
    pub value: Value,
    pub source: Source,
}

/// Decode raw body bytes according to the negotiated media type.
///
/// JSON bodies keep their native types. Form bodies become an object of
/// strings (repeated keys collect into arrays) and everything else is
/// passed on as a string; both of those are cast lexically.
///
/// # Errors
///
/// Returns `DeserializeError` when the bytes aren't valid for the media type.
pub fn decode_body(mimetype: &str, body: &[u8]) -> Result<DecodedBody, ValidationError> {
    let kind = essence(mimetype);
    let deserialize_error = |reason: String| {
        ValidationError::new(
            ErrorKind::DeserializeError,
            format!(
                "Failed to deserialize value with {} mimetype: {}",
                kind, reason
            ),
        )
    };

    if is_json(&kind) {
        let value = serde_json::from_slice(body).map_err(|e| deserialize_error(e.to_string()))?;
        return Ok(DecodedBody {
            value,
            source: Source::Json,
        });
    }

    if kind == "application/x-www-form-urlencoded" {
        let mut map = Map::new();
        for (key, value) in form_urlencoded::parse(body) {
            let value = Value::String(value.into_owned());
            match map.get_mut(key.as_ref()) {
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(key.into_owned(), value);
                }
            }
        }
        return Ok(DecodedBody {
            value: Value::Object(map),
            source: Source::Lexical,
        });
    }

    let text = std::str::from_utf8(body).map_err(|e| deserialize_error(e.to_string()))?;
    Ok(DecodedBody {
        value: Value::String(text.to_string()),
        source: Source::Lexical,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(types: &[&str]) -> IndexMap<String, MediaType> {
        types
            .iter()
            .map(|t| (t.to_string(), MediaType::default()))
            .collect()
    }

    #[test]
    fn essence_strips_parameters() {
        assert_eq!(essence("Text/HTML; charset=utf-8"), "text/html");
        assert_eq!(essence(" application/json "), "application/json");
    }

    #[test]
    fn find_media_exact() {
        let declared = content(&["application/json", "text/plain"]);
        let (found, _) = find_media(&declared, "text/plain; charset=utf-8").unwrap();
        assert_eq!(found, "text/plain");
    }

    #[test]
    fn find_media_no_wildcards() {
        let declared = content(&["application/*"]);
        let err = find_media(&declared, "application/json").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidContentType);
    }

    #[test]
    fn find_media_names_rejected_type() {
        let declared = content(&["application/json"]);
        let err = find_media(&declared, "text/html; charset=utf-8").unwrap_err();
        assert_eq!(err.status(), 415);
        assert_eq!(
            err.message,
            "Content for following mimetype not found: text/html"
        );
    }

    #[test]
    fn negotiate_without_content_type() {
        let single = content(&["application/json"]);
        assert_eq!(negotiate(&single, None).unwrap().0, "application/json");

        let several = content(&["application/json", "text/plain"]);
        assert!(negotiate(&several, None).is_err());
    }

    #[test]
    fn decode_json() {
        let body = decode_body("application/problem+json", br#"{"a": 1}"#).unwrap();
        assert_eq!(body.value, json!({"a": 1}));
        assert_eq!(body.source, Source::Json);
    }

    #[test]
    fn decode_invalid_json() {
        let err = decode_body("application/json", b"{nope").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeserializeError);
        assert!(err.message.starts_with(
            "Failed to deserialize value with application/json mimetype:"
        ));
    }

    #[test]
    fn decode_form() {
        let body =
            decode_body("application/x-www-form-urlencoded", b"name=Rex&tag=a&tag=b").unwrap();
        assert_eq!(body.value, json!({"name": "Rex", "tag": ["a", "b"]}));
        assert_eq!(body.source, Source::Lexical);
    }

    #[test]
    fn decode_text() {
        let body = decode_body("text/plain", b"12").unwrap();
        assert_eq!(body.value, json!("12"));
        assert_eq!(body.source, Source::Lexical);
    }
}
