//! Contract loading from files, strings and HTTP URLs.
//!
//! Parses an OpenAPI 3 document (JSON or YAML) and builds the immutable
//! [`Contract`]. Component schema references are resolved once here through
//! the arena's name table, so self-referential schemas need no special
//! handling later.

use std::path::Path;

use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::{Map, Value};

use crate::contract::{
    Additional, ArrayRules, Contract, MediaType, NumberRules, ObjectRules, Operation, Parameter,
    PathItem, PathTemplate, RequestBody, Response, Schema, SchemaArena, SchemaId, SchemaKind,
    Server, ServerVariable, StringRules, Style,
};
use crate::error::LoadError;
use crate::types::{json_type_name, Location, Method};

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA_REF_PREFIX: &str = "#/components/schemas/";

/// Load a contract document from a file path without building it.
///
/// `.json` files are parsed as JSON, everything else as YAML.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist, or a parse
/// error if the content isn't a valid document.
pub fn load_document(path: &Path) -> Result<Value, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        serde_json::from_str(&content).map_err(|source| LoadError::InvalidJson { source })
    } else {
        serde_yaml::from_str(&content).map_err(|source| LoadError::InvalidYaml { source })
    }
}

/// Parse a contract document from a string.
///
/// Content starting with `{` is parsed as JSON, anything else as YAML.
pub fn load_document_str(content: &str) -> Result<Value, LoadError> {
    if content.trim_start().starts_with('{') {
        serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
    } else {
        serde_yaml::from_str(content).map_err(|source| LoadError::InvalidYaml { source })
    }
}

/// Load and build a contract from a file path.
pub fn load_contract(path: &Path) -> Result<Contract, LoadError> {
    build_contract(&load_document(path)?)
}

/// Load and build a contract from a JSON or YAML string.
pub fn load_contract_str(content: &str) -> Result<Contract, LoadError> {
    build_contract(&load_document_str(content)?)
}

/// Load and build a contract from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails, or a parse error
/// if the body isn't a valid document.
#[cfg(feature = "remote")]
pub fn load_contract_url(url: &str) -> Result<Contract, LoadError> {
    let network = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    // Check for HTTP errors before parsing
    let body = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.text())
        .map_err(network)?;

    load_contract_str(&body)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a contract from a file path or URL.
///
/// URL loading requires the `remote` feature.
pub fn load_contract_auto(source: &str) -> Result<Contract, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_contract_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_contract(Path::new(source))
    }
}

/// Navigate a JSON Pointer fragment (e.g., "#/components/schemas/Pet").
///
/// Returns a reference to the value at the given path within the document.
pub fn navigate_fragment<'a>(document: &'a Value, fragment: &str) -> Option<&'a Value> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Some(document);
    }

    let mut current = document;
    for part in path.split('/') {
        // Fragments may be percent-encoded; then unescape JSON Pointer (~1 = /, ~0 = ~)
        let decoded = percent_decode_str(part).decode_utf8_lossy();
        let key = decoded.replace("~1", "/").replace("~0", "~");
        current = match current {
            Value::Object(map) => map.get(&key)?,
            Value::Array(arr) => arr.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Build a contract from a parsed OpenAPI 3 document.
///
/// # Errors
///
/// Returns `LoadError::UnresolvedRef` for references that don't point into
/// the document, and `LoadError::InvalidContract` for structural problems.
pub fn build_contract(document: &Value) -> Result<Contract, LoadError> {
    let version = document
        .get("openapi")
        .and_then(Value::as_str)
        .ok_or_else(|| LoadError::invalid("/openapi", "missing OpenAPI version"))?;
    if !version.starts_with("3.") {
        return Err(LoadError::invalid(
            "/openapi",
            format!("unsupported OpenAPI version {}", version),
        ));
    }

    let mut builder = Builder {
        document,
        arena: SchemaArena::default(),
        ref_stack: Vec::new(),
    };

    // Reserve every component name before building bodies so references
    // (including cyclic ones) resolve to a stable id.
    let components: Vec<(&String, &Value)> = document
        .pointer("/components/schemas")
        .and_then(Value::as_object)
        .map(|m| m.iter().collect())
        .unwrap_or_default();
    let reserved: Vec<SchemaId> = components
        .iter()
        .map(|(name, _)| builder.arena.reserve(name))
        .collect();
    for ((name, value), id) in components.into_iter().zip(reserved) {
        let path = format!("/components/schemas/{}", escape_pointer(name));
        let schema = match value.get("$ref").and_then(Value::as_str) {
            // Alias of another schema
            Some(_) => Schema {
                all_of: vec![builder.schema(value, &path)?],
                ..Schema::default()
            },
            None => builder.schema_body(value, &path)?,
        };
        builder.arena.set(id, schema);
    }

    let servers = builder.servers()?;

    let mut paths = IndexMap::new();
    if let Some(map) = document.get("paths").and_then(Value::as_object) {
        for (template, item) in map {
            if template.starts_with("x-") {
                continue;
            }
            let path = format!("/paths/{}", escape_pointer(template));
            let item = builder.path_item(template, item, &path)?;
            paths.insert(template.clone(), item);
        }
    }

    let info = document.get("info");
    let contract = Contract {
        title: info
            .and_then(|i| i.get("title"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        version: info
            .and_then(|i| i.get("version"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        servers,
        paths,
        schemas: builder.arena,
    };

    tracing::debug!(
        title = %contract.title,
        servers = contract.servers.len(),
        paths = contract.paths.len(),
        schemas = contract.schemas.len(),
        "contract loaded"
    );
    Ok(contract)
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

struct Builder<'d> {
    document: &'d Value,
    arena: SchemaArena,
    /// Non-component schema refs currently being inlined.
    ref_stack: Vec<String>,
}

impl<'d> Builder<'d> {
    /// Follow `$ref` on a non-schema object (parameter, request body,
    /// response) until a concrete definition is reached.
    fn deref<'v>(&self, value: &'v Value, path: &str) -> Result<&'v Value, LoadError>
    where
        'd: 'v,
    {
        let mut current = value;
        let mut hops = 0;
        while let Some(reference) = current.get("$ref").and_then(Value::as_str) {
            hops += 1;
            if hops > 32 {
                return Err(LoadError::invalid(
                    path,
                    format!("circular reference: {}", reference),
                ));
            }
            current = self.lookup(reference, path)?;
        }
        Ok(current)
    }

    fn lookup(&self, reference: &str, path: &str) -> Result<&'d Value, LoadError> {
        let unresolved = || LoadError::UnresolvedRef {
            path: path.to_string(),
            reference: reference.to_string(),
        };
        if !reference.starts_with('#') {
            return Err(unresolved());
        }
        navigate_fragment(self.document, reference).ok_or_else(unresolved)
    }

    fn servers(&self) -> Result<Vec<Server>, LoadError> {
        let Some(list) = self.document.get("servers").and_then(Value::as_array) else {
            return Ok(vec![default_server()?]);
        };
        if list.is_empty() {
            return Ok(vec![default_server()?]);
        }

        let mut servers = Vec::with_capacity(list.len());
        for (i, entry) in list.iter().enumerate() {
            let path = format!("/servers/{}", i);
            let url = entry
                .get("url")
                .and_then(Value::as_str)
                .ok_or_else(|| LoadError::invalid(&path, "server without url"))?;

            let mut variables = IndexMap::new();
            if let Some(vars) = entry.get("variables").and_then(Value::as_object) {
                for (name, var) in vars {
                    let default = var
                        .get("default")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            LoadError::invalid(
                                format!("{}/variables/{}", path, name),
                                "server variable without default",
                            )
                        })?
                        .to_string();
                    let enumeration = var
                        .get("enum")
                        .and_then(Value::as_array)
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|v| v.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default();
                    variables.insert(
                        name.clone(),
                        ServerVariable {
                            default,
                            enumeration,
                        },
                    );
                }
            }

            let server = Server::new(url, variables)
                .map_err(|source| LoadError::InvalidPattern { path, source })?;
            servers.push(server);
        }
        Ok(servers)
    }

    fn path_item(
        &mut self,
        template: &str,
        value: &'d Value,
        path: &str,
    ) -> Result<PathItem, LoadError> {
        let value = self.deref(value, path)?;
        let parameters = self.parameters(value.get("parameters"), &format!("{}/parameters", path))?;

        let mut operations = IndexMap::new();
        for method in Method::ALL {
            let Some(op) = value.get(method.as_str()) else {
                continue;
            };
            let op_path = format!("{}/{}", path, method);
            operations.insert(method, self.operation(op, &op_path)?);
        }

        Ok(PathItem {
            template: PathTemplate::parse(template),
            parameters,
            operations,
        })
    }

    fn operation(&mut self, value: &'d Value, path: &str) -> Result<Operation, LoadError> {
        let parameters = self.parameters(value.get("parameters"), &format!("{}/parameters", path))?;

        let request_body = match value.get("requestBody") {
            Some(body) => {
                let body_path = format!("{}/requestBody", path);
                let body = self.deref(body, &body_path)?;
                Some(RequestBody {
                    required: body
                        .get("required")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    content: self.content(body.get("content"), &format!("{}/content", body_path))?,
                })
            }
            None => None,
        };

        let mut responses = IndexMap::new();
        if let Some(map) = value.get("responses").and_then(Value::as_object) {
            for (code, response) in map {
                let resp_path = format!("{}/responses/{}", path, code);
                let response = self.deref(response, &resp_path)?;
                responses.insert(
                    code.clone(),
                    Response {
                        description: response
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        content: self
                            .content(response.get("content"), &format!("{}/content", resp_path))?,
                    },
                );
            }
        }

        Ok(Operation {
            operation_id: value
                .get("operationId")
                .and_then(Value::as_str)
                .map(String::from),
            deprecated: value
                .get("deprecated")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            parameters,
            request_body,
            responses,
        })
    }

    fn content(
        &mut self,
        value: Option<&'d Value>,
        path: &str,
    ) -> Result<IndexMap<String, MediaType>, LoadError> {
        let mut content = IndexMap::new();
        let Some(map) = value.and_then(Value::as_object) else {
            return Ok(content);
        };
        for (mimetype, media) in map {
            let media_path = format!("{}/{}", path, escape_pointer(mimetype));
            let schema = match media.get("schema") {
                Some(schema) => Some(self.schema(schema, &format!("{}/schema", media_path))?),
                None => None,
            };
            content.insert(mimetype.clone(), MediaType { schema });
        }
        Ok(content)
    }

    fn parameters(
        &mut self,
        value: Option<&'d Value>,
        path: &str,
    ) -> Result<Vec<Parameter>, LoadError> {
        let Some(list) = value.and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        list.iter()
            .enumerate()
            .map(|(i, param)| self.parameter(param, &format!("{}/{}", path, i)))
            .collect()
    }

    fn parameter(&mut self, value: &'d Value, path: &str) -> Result<Parameter, LoadError> {
        let value = self.deref(value, path)?;
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| LoadError::invalid(path, "parameter without name"))?;
        let location_raw = value
            .get("in")
            .and_then(Value::as_str)
            .ok_or_else(|| LoadError::invalid(path, "parameter without location"))?;
        let location = Location::parse(location_raw).ok_or_else(|| {
            LoadError::invalid(path, format!("unknown parameter location {}", location_raw))
        })?;

        let style = match value.get("style").and_then(Value::as_str) {
            Some(raw) => Style::parse(raw)
                .ok_or_else(|| LoadError::invalid(path, format!("unknown style {}", raw)))?,
            None => Style::default_for(location),
        };
        if !style.allowed_in(location) {
            return Err(LoadError::invalid(
                path,
                format!("style {:?} is not allowed in {}", style, location),
            ));
        }

        // `content`-described parameters use the schema of their single media type
        let schema_value = value.get("schema").or_else(|| {
            value
                .get("content")
                .and_then(Value::as_object)
                .and_then(|m| m.values().next())
                .and_then(|media| media.get("schema"))
        });
        let schema = match schema_value {
            Some(schema) => Some(self.schema(schema, &format!("{}/schema", path))?),
            None => None,
        };

        Ok(Parameter {
            name: name.to_string(),
            location,
            // Path parameters are always required
            required: location == Location::Path
                || value
                    .get("required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            deprecated: value
                .get("deprecated")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            allow_empty_value: value
                .get("allowEmptyValue")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            style,
            explode: value
                .get("explode")
                .and_then(Value::as_bool)
                .unwrap_or(style == Style::Form),
            schema,
        })
    }

    /// Build (or look up) the schema at `value`, returning its id.
    fn schema(&mut self, value: &'d Value, path: &str) -> Result<SchemaId, LoadError> {
        let Some(reference) = value.get("$ref").and_then(Value::as_str) else {
            let schema = self.schema_body(value, path)?;
            return Ok(self.arena.push(schema));
        };

        if let Some(name) = reference.strip_prefix(SCHEMA_REF_PREFIX) {
            let name = percent_decode_str(name).decode_utf8_lossy();
            let name = name.replace("~1", "/").replace("~0", "~");
            if let Some(id) = self.arena.by_name(&name) {
                return Ok(id);
            }
        }

        // Any other in-document pointer is inlined, guarding against cycles.
        if self.ref_stack.iter().any(|r| r == reference) {
            return Err(LoadError::invalid(
                path,
                format!("circular reference: {}", reference),
            ));
        }
        let target = self.lookup(reference, path)?;
        self.ref_stack.push(reference.to_string());
        let result = self.schema(target, path);
        self.ref_stack.pop();
        result
    }

    fn schema_body(&mut self, value: &'d Value, path: &str) -> Result<Schema, LoadError> {
        let Value::Object(map) = value else {
            // `true` / `{}` style schemas accept anything
            return match value {
                Value::Bool(true) => Ok(Schema::default()),
                other => Err(LoadError::invalid(
                    path,
                    format!("schema must be an object, got {}", json_type_name(other)),
                )),
            };
        };

        let mut nullable = get_bool(map, "nullable");
        let type_name = match map.get("type") {
            Some(Value::String(t)) => Some(t.clone()),
            // 3.1 style: ["string", "null"]
            Some(Value::Array(types)) => {
                let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
                if names.contains(&"null") {
                    nullable = true;
                }
                names
                    .iter()
                    .find(|t| **t != "null")
                    .or(names.first())
                    .map(|t| t.to_string())
            }
            Some(other) => {
                return Err(LoadError::invalid(
                    format!("{}/type", path),
                    format!("expected string or array, got {}", json_type_name(other)),
                ))
            }
            None if map.contains_key("properties") => Some("object".to_string()),
            None if map.contains_key("items") => Some("array".to_string()),
            None => None,
        };

        let kind = match type_name.as_deref() {
            None => SchemaKind::Any,
            Some("null") => SchemaKind::Null,
            Some("boolean") => SchemaKind::Boolean,
            Some("integer") => SchemaKind::Integer(number_rules(map)),
            Some("number") => SchemaKind::Number(number_rules(map)),
            Some("string") => SchemaKind::String(self.string_rules(map, path)?),
            Some("array") => SchemaKind::Array(self.array_rules(map, path)?),
            Some("object") => SchemaKind::Object(self.object_rules(map, path)?),
            Some(other) => {
                return Err(LoadError::invalid(
                    format!("{}/type", path),
                    format!("unknown type {}", other),
                ))
            }
        };

        Ok(Schema {
            kind,
            format: map.get("format").and_then(Value::as_str).map(String::from),
            nullable,
            enumeration: map.get("enum").and_then(Value::as_array).cloned(),
            default: map.get("default").cloned(),
            read_only: get_bool(map, "readOnly"),
            write_only: get_bool(map, "writeOnly"),
            all_of: self.schema_list(map.get("allOf"), &format!("{}/allOf", path))?,
            any_of: self.schema_list(map.get("anyOf"), &format!("{}/anyOf", path))?,
            one_of: self.schema_list(map.get("oneOf"), &format!("{}/oneOf", path))?,
        })
    }

    fn schema_list(
        &mut self,
        value: Option<&'d Value>,
        path: &str,
    ) -> Result<Vec<SchemaId>, LoadError> {
        let Some(list) = value.and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        list.iter()
            .enumerate()
            .map(|(i, s)| self.schema(s, &format!("{}/{}", path, i)))
            .collect()
    }

    fn string_rules(
        &mut self,
        map: &Map<String, Value>,
        path: &str,
    ) -> Result<StringRules, LoadError> {
        let pattern = match map.get("pattern").and_then(Value::as_str) {
            Some(p) => Some(Regex::new(p).map_err(|source| LoadError::InvalidPattern {
                path: format!("{}/pattern", path),
                source,
            })?),
            None => None,
        };
        Ok(StringRules {
            min_length: get_usize(map, "minLength"),
            max_length: get_usize(map, "maxLength"),
            pattern,
        })
    }

    fn array_rules(
        &mut self,
        map: &'d Map<String, Value>,
        path: &str,
    ) -> Result<ArrayRules, LoadError> {
        let items = match map.get("items") {
            Some(items) => Some(self.schema(items, &format!("{}/items", path))?),
            None => None,
        };
        Ok(ArrayRules {
            items,
            min_items: get_usize(map, "minItems"),
            max_items: get_usize(map, "maxItems"),
            unique_items: get_bool(map, "uniqueItems"),
        })
    }

    fn object_rules(
        &mut self,
        map: &'d Map<String, Value>,
        path: &str,
    ) -> Result<ObjectRules, LoadError> {
        let mut properties = IndexMap::new();
        if let Some(props) = map.get("properties").and_then(Value::as_object) {
            for (name, prop) in props {
                let prop_path = format!("{}/properties/{}", path, escape_pointer(name));
                properties.insert(name.clone(), self.schema(prop, &prop_path)?);
            }
        }

        let additional = match map.get("additionalProperties") {
            None | Some(Value::Bool(true)) => Additional::Allowed,
            Some(Value::Bool(false)) => Additional::Forbidden,
            Some(schema) => Additional::Schema(
                self.schema(schema, &format!("{}/additionalProperties", path))?,
            ),
        };

        Ok(ObjectRules {
            properties,
            required: map
                .get("required")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
            additional,
            min_properties: get_usize(map, "minProperties"),
            max_properties: get_usize(map, "maxProperties"),
        })
    }
}

fn default_server() -> Result<Server, LoadError> {
    Server::new("/", IndexMap::new()).map_err(|source| LoadError::InvalidPattern {
        path: "/servers".to_string(),
        source,
    })
}

fn number_rules(map: &Map<String, Value>) -> NumberRules {
    let mut rules = NumberRules {
        minimum: map.get("minimum").and_then(Value::as_f64),
        maximum: map.get("maximum").and_then(Value::as_f64),
        exclusive_minimum: false,
        exclusive_maximum: false,
        multiple_of: map.get("multipleOf").and_then(Value::as_f64),
    };
    // 3.0 uses booleans, 3.1 uses the bound itself
    match map.get("exclusiveMinimum") {
        Some(Value::Bool(b)) => rules.exclusive_minimum = *b,
        Some(Value::Number(n)) => {
            rules.minimum = n.as_f64();
            rules.exclusive_minimum = true;
        }
        _ => {}
    }
    match map.get("exclusiveMaximum") {
        Some(Value::Bool(b)) => rules.exclusive_maximum = *b,
        Some(Value::Number(n)) => {
            rules.maximum = n.as_f64();
            rules.exclusive_maximum = true;
        }
        _ => {}
    }
    rules
}

fn get_bool(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn get_usize(map: &Map<String, Value>, key: &str) -> Option<usize> {
    map.get(key)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}
