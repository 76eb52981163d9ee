//! Transport-neutral request and response shapes.
//!
//! A transport adapter fills these from whatever its framework hands it; the
//! validator never sees framework types.

use serde_json::Value;
use url::{form_urlencoded, Url};

/// A normalized inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub scheme: String,
    /// Host, including the port when it isn't the scheme's default.
    pub host: String,
    /// Raw (still percent-encoded) path.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    /// Build a request from a method and an absolute URL.
    pub fn new(method: impl Into<String>, url: &str) -> Result<Self, url::ParseError> {
        let parsed = Url::parse(url)?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => String::new(),
        };
        Ok(Self {
            method: method.into(),
            scheme: parsed.scheme().to_string(),
            host,
            path: parsed.path().to_string(),
            query: parsed.query().unwrap_or_default().to_string(),
            headers: Vec::new(),
            body: None,
        })
    }

    /// Build a request from already separated URL parts.
    pub fn from_parts(
        method: impl Into<String>,
        scheme: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            scheme: scheme.into(),
            host: host.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body, adding `Content-Type: application/json` unless a
    /// content type is already present.
    pub fn with_json(mut self, body: &Value) -> Self {
        if self.content_type().is_none() {
            self.headers
                .push(("Content-Type".to_string(), "application/json".to_string()));
        }
        self.body = Some(body.to_string().into_bytes());
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a header, in arrival order.
    pub fn header_values<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + 'n
    where
        'a: 'n,
    {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// True when a non-empty body is present.
    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }

    /// Decoded query pairs in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        form_urlencoded::parse(self.query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// Cookies from every `Cookie` header, in order.
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.header_values("cookie")
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.trim().trim_matches('"').to_string()))
            })
            .collect()
    }

    /// `scheme://host/path`, as used in resolution messages.
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }
}

/// What the handler produced, probed after it ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseProbe {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl ResponseProbe {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body, defaulting the content type to `application/json`.
    pub fn with_json(mut self, body: &Value) -> Self {
        if self.content_type.is_none() {
            self.content_type = Some("application/json".to_string());
        }
        self.body = Some(body.to_string().into_bytes());
        self
    }

    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_splits_url() {
        let req = Request::new("GET", "http://localhost/browse/12?limit=5").unwrap();
        assert_eq!(req.scheme, "http");
        assert_eq!(req.host, "localhost");
        assert_eq!(req.path, "/browse/12");
        assert_eq!(req.query, "limit=5");
        assert_eq!(req.url(), "http://localhost/browse/12");
    }

    #[test]
    fn new_keeps_non_default_port() {
        let req = Request::new("GET", "https://api.example.com:8443/x").unwrap();
        assert_eq!(req.host, "api.example.com:8443");
        let req = Request::new("GET", "https://api.example.com:443/x").unwrap();
        assert_eq!(req.host, "api.example.com");
    }

    #[test]
    fn headers_are_case_insensitive() {
        let req = Request::from_parts("GET", "http", "h", "/")
            .with_header("X-Trace", "a")
            .with_header("x-trace", "b");
        assert_eq!(req.header("X-TRACE"), Some("a"));
        assert_eq!(req.header_values("x-trace").collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn header_outlives_the_name_used_to_find_it() {
        let req = Request::from_parts("GET", "http", "h", "/").with_header("X-Count", "3");
        let value = {
            let name = String::from("x-count");
            req.header(&name)
        };
        assert_eq!(value, Some("3"));

        let values: Vec<&str> = {
            let name = String::from("X-COUNT");
            req.header_values(&name).collect()
        };
        assert_eq!(values, vec!["3"]);
    }

    #[test]
    fn query_pairs_are_decoded() {
        let req = Request::from_parts("GET", "http", "h", "/").with_query("q=a+b&tag=x%2Cy&tag=z");
        assert_eq!(
            req.query_pairs(),
            vec![
                ("q".to_string(), "a b".to_string()),
                ("tag".to_string(), "x,y".to_string()),
                ("tag".to_string(), "z".to_string()),
            ]
        );
    }

    #[test]
    fn cookies_are_parsed() {
        let req = Request::from_parts("GET", "http", "h", "/")
            .with_header("Cookie", "session=abc; theme=\"dark\"; bogus");
        assert_eq!(
            req.cookies(),
            vec![
                ("session".to_string(), "abc".to_string()),
                ("theme".to_string(), "dark".to_string()),
            ]
        );
    }

    #[test]
    fn with_json_sets_content_type_once() {
        let req = Request::from_parts("POST", "http", "h", "/")
            .with_header("Content-Type", "application/vnd.api+json")
            .with_json(&json!({"a": 1}));
        assert_eq!(req.content_type(), Some("application/vnd.api+json"));
        assert!(req.has_body());

        let resp = ResponseProbe::new(200).with_json(&json!([]));
        assert_eq!(resp.content_type.as_deref(), Some("application/json"));
        assert_eq!(resp.body.as_deref(), Some(b"[]".as_slice()));
    }

    #[test]
    fn empty_body_is_no_body() {
        let req = Request::from_parts("POST", "http", "h", "/").with_body(Vec::new());
        assert!(!req.has_body());
        assert!(!ResponseProbe::new(204).has_body());
    }
}
