//! In-memory OpenAPI contract.
//!
//! Built once by the loader and read-only afterwards. Schemas live in an
//! arena and reference each other by [`SchemaId`], which is how recursive
//! component schemas are represented without owning cycles.

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;

use crate::types::{Location, Method};

/// Index of a schema node inside a [`SchemaArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(pub(crate) usize);

/// Numeric constraints shared by `integer` and `number`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberRules {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: bool,
    pub exclusive_maximum: bool,
    pub multiple_of: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct StringRules {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
}

#[derive(Debug, Clone, Default)]
pub struct ArrayRules {
    pub items: Option<SchemaId>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub unique_items: bool,
}

/// What an object schema does with properties it doesn't declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Additional {
    #[default]
    Allowed,
    Forbidden,
    Schema(SchemaId),
}

#[derive(Debug, Clone, Default)]
pub struct ObjectRules {
    pub properties: IndexMap<String, SchemaId>,
    pub required: Vec<String>,
    pub additional: Additional,
    pub min_properties: Option<usize>,
    pub max_properties: Option<usize>,
}

/// Declared type of a schema node with its type-specific rules.
#[derive(Debug, Clone, Default)]
pub enum SchemaKind {
    /// No `type` keyword: any value passes the type check.
    #[default]
    Any,
    Null,
    Boolean,
    Integer(NumberRules),
    Number(NumberRules),
    String(StringRules),
    Array(ArrayRules),
    Object(ObjectRules),
}

impl SchemaKind {
    /// Type name as written in the `type` keyword.
    pub fn type_name(&self) -> &'static str {
        match self {
            SchemaKind::Any => "any",
            SchemaKind::Null => "null",
            SchemaKind::Boolean => "boolean",
            SchemaKind::Integer(_) => "integer",
            SchemaKind::Number(_) => "number",
            SchemaKind::String(_) => "string",
            SchemaKind::Array(_) => "array",
            SchemaKind::Object(_) => "object",
        }
    }
}

/// One schema node.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub kind: SchemaKind,
    pub format: Option<String>,
    pub nullable: bool,
    pub enumeration: Option<Vec<Value>>,
    pub default: Option<Value>,
    pub read_only: bool,
    pub write_only: bool,
    pub all_of: Vec<SchemaId>,
    pub any_of: Vec<SchemaId>,
    pub one_of: Vec<SchemaId>,
}

/// Owns every schema node of a contract.
#[derive(Debug, Clone, Default)]
pub struct SchemaArena {
    nodes: Vec<Schema>,
    names: IndexMap<String, SchemaId>,
}

impl SchemaArena {
    pub fn get(&self, id: SchemaId) -> &Schema {
        &self.nodes[id.0]
    }

    /// Look up a component schema by its name under `#/components/schemas`.
    pub fn by_name(&self, name: &str) -> Option<SchemaId> {
        self.names.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn push(&mut self, schema: Schema) -> SchemaId {
        self.nodes.push(schema);
        SchemaId(self.nodes.len() - 1)
    }

    /// Allocate a named placeholder so references can point at it before
    /// its body is built.
    pub(crate) fn reserve(&mut self, name: &str) -> SchemaId {
        let id = self.push(Schema::default());
        self.names.insert(name.to_string(), id);
        id
    }

    pub(crate) fn set(&mut self, id: SchemaId, schema: Schema) {
        self.nodes[id.0] = schema;
    }
}

/// A `{name}` substitution in a server URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVariable {
    pub default: String,
    pub enumeration: Vec<String>,
}

/// A server URL template compiled for matching.
#[derive(Debug, Clone)]
pub struct Server {
    pub url: String,
    pub variables: IndexMap<String, ServerVariable>,
    relative: bool,
    names: Vec<String>,
    matcher: Regex,
}

impl Server {
    /// Compile a server URL template.
    ///
    /// Relative templates (starting with `/`) match on the path only, so they
    /// accept any scheme and host.
    pub fn new(
        url: impl Into<String>,
        variables: IndexMap<String, ServerVariable>,
    ) -> Result<Self, regex::Error> {
        let url = url.into();
        let relative = url.starts_with('/');
        let normalized = if relative {
            url.clone()
        } else {
            normalize_origin(&url)
        };
        let base = normalized.trim_end_matches('/');

        let mut pattern = String::from("^");
        let mut names = Vec::new();
        let mut rest = base;
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|c| open + c) else {
                break;
            };
            pattern.push_str(&regex::escape(&rest[..open]));
            let name = &rest[open + 1..close];
            match variables.get(name) {
                Some(var) if !var.enumeration.is_empty() => {
                    let alts: Vec<String> =
                        var.enumeration.iter().map(|v| regex::escape(v)).collect();
                    pattern.push_str(&format!("({})", alts.join("|")));
                }
                _ => pattern.push_str("([^/]+)"),
            }
            names.push(name.to_string());
            rest = &rest[close + 1..];
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push_str("(/.*)?$");

        Ok(Self {
            matcher: Regex::new(&pattern)?,
            url,
            variables,
            relative,
            names,
        })
    }

    pub fn is_relative(&self) -> bool {
        self.relative
    }

    /// Match a request URL. On success returns the remaining path (always
    /// starting with `/`) and the bound server variables.
    pub fn match_url(&self, scheme: &str, host: &str, path: &str) -> Option<ServerMatch> {
        let target = if self.relative {
            path.to_string()
        } else {
            let scheme = scheme.to_ascii_lowercase();
            let host = host.to_ascii_lowercase();
            format!(
                "{}://{}{}",
                scheme,
                strip_default_port(&scheme, &host),
                path
            )
        };
        let captures = self.matcher.captures(&target)?;

        let variables = self
            .names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                captures
                    .get(i + 1)
                    .map(|m| (name.clone(), m.as_str().to_string()))
            })
            .collect();
        let remainder = captures
            .get(self.names.len() + 1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Some(ServerMatch {
            remainder,
            variables,
        })
    }
}

/// Lowercase the scheme and authority of an absolute server URL and drop a
/// port equal to the scheme's default. `{name}` variables keep their case.
fn normalize_origin(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let scheme = scheme.to_ascii_lowercase();
    let (authority, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));

    let mut lowered = String::with_capacity(authority.len());
    let mut in_variable = false;
    for c in authority.chars() {
        match c {
            '{' => in_variable = true,
            '}' => in_variable = false,
            _ => {}
        }
        lowered.push(if in_variable { c } else { c.to_ascii_lowercase() });
    }

    format!(
        "{}://{}{}",
        scheme,
        strip_default_port(&scheme, &lowered),
        path
    )
}

fn strip_default_port<'a>(scheme: &str, host: &'a str) -> &'a str {
    let default = match scheme {
        "http" => ":80",
        "https" => ":443",
        _ => return host,
    };
    host.strip_suffix(default).unwrap_or(host)
}

/// Result of matching a request URL against a [`Server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMatch {
    pub remainder: String,
    pub variables: IndexMap<String, String>,
}

/// One segment of a path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed path template such as `/pets/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    pub raw: String,
    pub segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .trim_start_matches('/')
            .split('/')
            .map(|seg| {
                match seg
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                    .filter(|name| !name.is_empty() && !name.contains(['{', '}']))
                {
                    Some(name) => Segment::Variable(name.to_string()),
                    None => Segment::Literal(seg.to_string()),
                }
            })
            .collect();
        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn variable_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Variable(_)))
            .count()
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }
}

/// Serialization style of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Style {
    Simple,
    Label,
    Matrix,
    Form,
    SpaceDelimited,
    PipeDelimited,
    DeepObject,
}

impl Style {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(Style::Simple),
            "label" => Some(Style::Label),
            "matrix" => Some(Style::Matrix),
            "form" => Some(Style::Form),
            "spaceDelimited" => Some(Style::SpaceDelimited),
            "pipeDelimited" => Some(Style::PipeDelimited),
            "deepObject" => Some(Style::DeepObject),
            _ => None,
        }
    }

    /// Default style for a location.
    pub fn default_for(location: Location) -> Self {
        match location {
            Location::Path | Location::Header => Style::Simple,
            Location::Query | Location::Cookie => Style::Form,
        }
    }

    /// Whether this style can be used in the given location.
    pub fn allowed_in(&self, location: Location) -> bool {
        match self {
            Style::Simple => matches!(location, Location::Path | Location::Header),
            Style::Label | Style::Matrix => location == Location::Path,
            Style::Form => matches!(location, Location::Query | Location::Cookie),
            Style::SpaceDelimited | Style::PipeDelimited | Style::DeepObject => {
                location == Location::Query
            }
        }
    }
}

/// A declared parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub location: Location,
    pub required: bool,
    pub deprecated: bool,
    pub allow_empty_value: bool,
    pub style: Style,
    pub explode: bool,
    pub schema: Option<SchemaId>,
}

/// Media type entry of a body declaration.
#[derive(Debug, Clone, Default)]
pub struct MediaType {
    pub schema: Option<SchemaId>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestBody {
    pub required: bool,
    pub content: IndexMap<String, MediaType>,
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub description: String,
    pub content: IndexMap<String, MediaType>,
}

#[derive(Debug, Clone, Default)]
pub struct Operation {
    pub operation_id: Option<String>,
    pub deprecated: bool,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    /// Keyed by status code (`"200"`), range (`"2XX"`) or `"default"`.
    pub responses: IndexMap<String, Response>,
}

impl Operation {
    /// Find the response entry for a status code.
    ///
    /// Exact code first, then the `NXX` range, then `default`.
    pub fn response_for(&self, status: u16) -> Option<(&str, &Response)> {
        let exact = status.to_string();
        let range = format!("{}XX", status / 100);
        let found = [exact.as_str(), range.as_str(), "default"]
            .into_iter()
            .find_map(|key| {
                self.responses
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(k, v)| (k.as_str(), v))
            });
        found
    }
}

#[derive(Debug, Clone)]
pub struct PathItem {
    pub template: PathTemplate,
    pub parameters: Vec<Parameter>,
    pub operations: IndexMap<Method, Operation>,
}

impl PathItem {
    /// Parameters in effect for an operation: path-level declarations, with
    /// operation-level ones replacing any that share name and location.
    pub fn effective_parameters<'a>(&'a self, operation: &'a Operation) -> Vec<&'a Parameter> {
        let mut params: Vec<&Parameter> = self
            .parameters
            .iter()
            .filter(|p| {
                !operation
                    .parameters
                    .iter()
                    .any(|o| o.name == p.name && o.location == p.location)
            })
            .collect();
        params.extend(operation.parameters.iter());
        params
    }
}

/// A loaded OpenAPI contract.
#[derive(Debug, Clone)]
pub struct Contract {
    pub title: String,
    pub version: String,
    pub servers: Vec<Server>,
    pub paths: IndexMap<String, PathItem>,
    pub schemas: SchemaArena,
}

impl Contract {
    pub fn schema(&self, id: SchemaId) -> &Schema {
        self.schemas.get(id)
    }

    /// Every declared operation as `(method, template, operation)`, in
    /// document order.
    pub fn operations(&self) -> impl Iterator<Item = (Method, &str, &Operation)> {
        self.paths.iter().flat_map(|(template, item)| {
            item.operations
                .iter()
                .map(move |(method, op)| (*method, template.as_str(), op))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(url: &str) -> Server {
        Server::new(url, IndexMap::new()).unwrap()
    }

    #[test]
    fn contract_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Contract>();
    }

    #[test]
    fn absolute_server_matches_scheme_and_host() {
        let s = server("http://localhost");
        let m = s.match_url("http", "localhost", "/browse/12").unwrap();
        assert_eq!(m.remainder, "/browse/12");
        assert!(s.match_url("https", "localhost", "/browse/12").is_none());
        assert!(s.match_url("http", "example.com", "/browse/12").is_none());
    }

    #[test]
    fn server_host_is_case_insensitive() {
        let s = server("HTTP://API.Example.com/V1");
        let m = s.match_url("http", "api.example.com", "/V1/pets").unwrap();
        assert_eq!(m.remainder, "/pets");
        assert!(s.match_url("http", "API.EXAMPLE.COM", "/V1/pets").is_some());
        // the base path stays case-sensitive
        assert!(s.match_url("http", "api.example.com", "/v1/pets").is_none());
    }

    #[test]
    fn default_ports_are_equivalent() {
        let s = server("http://localhost:80");
        assert!(s.match_url("http", "localhost", "/x").is_some());
        assert!(s.match_url("http", "localhost:80", "/x").is_some());
        assert!(s.match_url("http", "localhost:8080", "/x").is_none());

        let s = server("https://api.example.com");
        assert!(s.match_url("https", "api.example.com:443", "/x").is_some());
        assert!(s.match_url("https", "api.example.com:8443", "/x").is_none());
    }

    #[test]
    fn server_base_path_is_stripped() {
        let s = server("https://api.example.com/v1/");
        let m = s.match_url("https", "api.example.com", "/v1/pets").unwrap();
        assert_eq!(m.remainder, "/pets");
        let m = s.match_url("https", "api.example.com", "/v1").unwrap();
        assert_eq!(m.remainder, "/");
        // base path must end on a segment boundary
        assert!(s.match_url("https", "api.example.com", "/v10/pets").is_none());
    }

    #[test]
    fn relative_server_matches_any_host() {
        let s = server("/");
        assert!(s.is_relative());
        let m = s.match_url("https", "anything", "/pets").unwrap();
        assert_eq!(m.remainder, "/pets");
    }

    #[test]
    fn server_variables_bind() {
        let mut vars = IndexMap::new();
        vars.insert(
            "env".to_string(),
            ServerVariable {
                default: "prod".into(),
                enumeration: vec!["prod".into(), "staging".into()],
            },
        );
        vars.insert(
            "port".to_string(),
            ServerVariable {
                default: "443".into(),
                enumeration: vec![],
            },
        );
        let s = Server::new("https://{env}.example.com:{port}/api", vars).unwrap();
        let m = s
            .match_url("https", "staging.example.com:8443", "/api/x")
            .unwrap();
        assert_eq!(m.variables["env"], "staging");
        assert_eq!(m.variables["port"], "8443");
        assert_eq!(m.remainder, "/x");
        assert!(s.match_url("https", "dev.example.com:1", "/api/x").is_none());
    }

    #[test]
    fn path_template_parse() {
        let t = PathTemplate::parse("/browse/{id}/tags");
        assert_eq!(
            t.segments,
            vec![
                Segment::Literal("browse".into()),
                Segment::Variable("id".into()),
                Segment::Literal("tags".into()),
            ]
        );
        assert_eq!(t.variable_count(), 1);
        assert_eq!(t.variables().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn style_defaults() {
        assert_eq!(Style::default_for(Location::Path), Style::Simple);
        assert_eq!(Style::default_for(Location::Query), Style::Form);
        assert_eq!(Style::default_for(Location::Header), Style::Simple);
        assert_eq!(Style::default_for(Location::Cookie), Style::Form);
        assert!(!Style::DeepObject.allowed_in(Location::Path));
        assert!(Style::Matrix.allowed_in(Location::Path));
    }

    #[test]
    fn response_lookup_order() {
        let mut op = Operation::default();
        op.responses.insert("default".into(), Response::default());
        op.responses.insert("2XX".into(), Response::default());
        op.responses.insert("201".into(), Response::default());
        assert_eq!(op.response_for(201).unwrap().0, "201");
        assert_eq!(op.response_for(200).unwrap().0, "2XX");
        assert_eq!(op.response_for(500).unwrap().0, "default");

        let empty = Operation::default();
        assert!(empty.response_for(200).is_none());
    }

    #[test]
    fn effective_parameters_override() {
        let param = |name: &str, required: bool| Parameter {
            name: name.into(),
            location: Location::Query,
            required,
            deprecated: false,
            allow_empty_value: false,
            style: Style::Form,
            explode: true,
            schema: None,
        };
        let item = PathItem {
            template: PathTemplate::parse("/x"),
            parameters: vec![param("a", false), param("b", false)],
            operations: IndexMap::new(),
        };
        let op = Operation {
            parameters: vec![param("a", true)],
            ..Operation::default()
        };
        let effective = item.effective_parameters(&op);
        assert_eq!(effective.len(), 2);
        assert_eq!(effective[0].name, "b");
        assert_eq!(effective[1].name, "a");
        assert!(effective[1].required);
    }
}
