//! Parameter extraction.
//!
//! Raw values are read from each location according to the parameter's
//! style, assembled into a JSON tree of strings, then cast lexically against
//! the parameter schema.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::contract::{Parameter, Schema, SchemaArena, SchemaId, SchemaKind, Style};
use crate::error::{ErrorKind, ValidationError};
use crate::request::Request;
use crate::types::Location;
use crate::unmarshal::{invalid, Source, Unmarshaller};

/// Casted parameters partitioned by location.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestParameters {
    pub path: IndexMap<String, Value>,
    pub query: IndexMap<String, Value>,
    pub header: IndexMap<String, Value>,
    pub cookie: IndexMap<String, Value>,
}

impl RequestParameters {
    pub fn get(&self, location: Location) -> &IndexMap<String, Value> {
        match location {
            Location::Path => &self.path,
            Location::Query => &self.query,
            Location::Header => &self.header,
            Location::Cookie => &self.cookie,
        }
    }

    fn get_mut(&mut self, location: Location) -> &mut IndexMap<String, Value> {
        match location {
            Location::Path => &mut self.path,
            Location::Query => &mut self.query,
            Location::Header => &mut self.header,
            Location::Cookie => &mut self.cookie,
        }
    }

    pub fn is_empty(&self) -> bool {
        Location::ALL.iter().all(|l| self.get(*l).is_empty())
    }
}

/// How a parameter value is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Primitive,
    Array,
    Object,
}

fn shape(schemas: &SchemaArena, id: Option<SchemaId>) -> Shape {
    let Some(id) = id else {
        return Shape::Primitive;
    };
    let schema = schemas.get(id);
    match &schema.kind {
        SchemaKind::Array(_) => Shape::Array,
        SchemaKind::Object(_) => Shape::Object,
        SchemaKind::Any => schema
            .all_of
            .iter()
            .chain(&schema.one_of)
            .chain(&schema.any_of)
            .map(|&branch| shape(schemas, Some(branch)))
            .find(|s| *s != Shape::Primitive)
            .unwrap_or(Shape::Primitive),
        _ => Shape::Primitive,
    }
}

/// Declared property names of an object schema, following composition.
fn property_names(schemas: &SchemaArena, id: SchemaId) -> Vec<String> {
    let schema = schemas.get(id);
    let mut names: Vec<String> = match &schema.kind {
        SchemaKind::Object(rules) => rules.properties.keys().cloned().collect(),
        _ => Vec::new(),
    };
    for &branch in schema.all_of.iter().chain(&schema.one_of).chain(&schema.any_of) {
        for name in property_names(schemas, branch) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Extract and cast every declared parameter.
///
/// Parameters are processed path, query, header, cookie; declaration order
/// is kept within a location. Every failure is collected.
///
/// # Errors
///
/// Returns `RequiredParameterMissing`, `EmptyParameterValue` and
/// `InvalidSchemaValue` errors tagged with the parameter they belong to.
pub fn extract_parameters(
    params: &[&Parameter],
    request: &Request,
    path_variables: &IndexMap<String, String>,
    unmarshaller: &Unmarshaller<'_>,
) -> Result<RequestParameters, Vec<ValidationError>> {
    let schemas = unmarshaller.schemas();
    let mut ordered: Vec<&Parameter> = params.to_vec();
    ordered.sort_by_key(|p| p.location);

    let query = request.query_pairs();
    let cookies = request.cookies();

    let mut out = RequestParameters::default();
    let mut errors = Vec::new();

    for param in ordered {
        if param.deprecated {
            tracing::warn!(name = %param.name, location = %param.location, "deprecated parameter");
        }
        let shape = shape(schemas, param.schema);
        let raw = match param.location {
            Location::Path => match path_variables.get(&param.name) {
                Some(bound) => match read_path(param, shape, bound) {
                    Some(value) => Some(value),
                    None => {
                        errors.push(malformed_path_value(param, schemas, bound));
                        continue;
                    }
                },
                None => None,
            },
            Location::Query => read_query(param, shape, &query, schemas),
            Location::Header => {
                let values: Vec<&str> = request.header_values(&param.name).collect();
                (!values.is_empty()).then(|| read_simple(shape, param.explode, &values.join(",")))
            }
            Location::Cookie => read_cookie(param, shape, &cookies),
        };

        let Some(raw) = raw else {
            if param.required {
                errors.push(
                    ValidationError::new(
                        ErrorKind::RequiredParameterMissing,
                        format!("Missing required parameter: {}", param.name),
                    )
                    .with_parameter(&param.name, param.location),
                );
            } else if let Some(default) =
                param.schema.and_then(|id| schemas.get(id).default.clone())
            {
                out.get_mut(param.location).insert(param.name.clone(), default);
            }
            continue;
        };

        if param.location == Location::Query && raw.as_str() == Some("") {
            if param.allow_empty_value {
                continue;
            }
            errors.push(
                ValidationError::new(
                    ErrorKind::EmptyParameterValue,
                    format!("Value of parameter cannot be empty: {}", param.name),
                )
                .with_parameter(&param.name, param.location),
            );
            continue;
        }

        let casted = match param.schema {
            Some(id) => unmarshaller.unmarshal(id, &raw, Source::Lexical),
            None => Ok(raw),
        };
        match casted {
            Ok(value) => {
                out.get_mut(param.location).insert(param.name.clone(), value);
            }
            Err(errs) => errors.extend(
                errs.into_iter().map(|e| e.with_parameter(&param.name, param.location)),
            ),
        }
    }

    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

fn strings<'a>(items: impl IntoIterator<Item = &'a str>) -> Value {
    Value::Array(items.into_iter().map(|s| Value::String(s.to_string())).collect())
}

/// `k1,v1,k2,v2` into an object.
fn flat_pairs<'a>(items: impl IntoIterator<Item = &'a str>) -> Value {
    let items: Vec<&str> = items.into_iter().collect();
    let map: Map<String, Value> = items
        .chunks(2)
        .map(|pair| {
            let value = pair.get(1).copied().unwrap_or_default();
            (pair[0].to_string(), Value::String(value.to_string()))
        })
        .collect();
    Value::Object(map)
}

/// `k1=v1` items into an object.
fn keyed_pairs<'a>(items: impl IntoIterator<Item = &'a str>) -> Value {
    let map: Map<String, Value> = items
        .into_iter()
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (k, v) = item.split_once('=').unwrap_or((item, ""));
            (k.to_string(), Value::String(v.to_string()))
        })
        .collect();
    Value::Object(map)
}

/// Simple style: `blue`, `blue,black`, `R,100,G,200` or `R=100,G=200`.
fn read_simple(shape: Shape, explode: bool, raw: &str) -> Value {
    match shape {
        Shape::Primitive => Value::String(raw.to_string()),
        Shape::Array => strings(raw.split(',')),
        Shape::Object if explode => keyed_pairs(raw.split(',')),
        Shape::Object => flat_pairs(raw.split(',')),
    }
}

fn read_path(param: &Parameter, shape: Shape, raw: &str) -> Option<Value> {
    match param.style {
        Style::Label => {
            let rest = raw.strip_prefix('.')?;
            let sep = if param.explode { '.' } else { ',' };
            Some(match shape {
                Shape::Primitive => Value::String(rest.to_string()),
                Shape::Array => strings(rest.split(sep)),
                Shape::Object if param.explode => keyed_pairs(rest.split('.')),
                Shape::Object => flat_pairs(rest.split(',')),
            })
        }
        Style::Matrix => {
            let rest = raw.strip_prefix(';')?;
            let prefix = format!("{}=", param.name);
            Some(match shape {
                Shape::Primitive => Value::String(rest.strip_prefix(&prefix)?.to_string()),
                Shape::Array if param.explode => {
                    strings(rest.split(';').filter_map(|item| item.strip_prefix(&prefix)))
                }
                Shape::Array => strings(rest.strip_prefix(&prefix)?.split(',')),
                Shape::Object if param.explode => keyed_pairs(rest.split(';')),
                Shape::Object => flat_pairs(rest.strip_prefix(&prefix)?.split(',')),
            })
        }
        _ => Some(read_simple(shape, param.explode, raw)),
    }
}

/// A bound path value without the prefix its label or matrix style requires.
fn malformed_path_value(param: &Parameter, schemas: &SchemaArena, raw: &str) -> ValidationError {
    let fallback = Schema::default();
    let schema = param.schema.map_or(&fallback, |id| schemas.get(id));
    let style = match param.style {
        Style::Label => "label",
        _ => "matrix",
    };
    ValidationError::new(
        ErrorKind::InvalidSchemaValue,
        invalid(
            &Value::String(raw.to_string()),
            schema,
            format!("not a valid {} style value", style),
        ),
    )
    .with_parameter(&param.name, param.location)
}

fn read_query(
    param: &Parameter,
    shape: Shape,
    pairs: &[(String, String)],
    schemas: &SchemaArena,
) -> Option<Value> {
    let values: Vec<&str> = pairs
        .iter()
        .filter(|(k, _)| *k == param.name)
        .map(|(_, v)| v.as_str())
        .collect();

    match (param.style, shape) {
        (Style::DeepObject, _) => {
            let prefix = format!("{}[", param.name);
            let map: Map<String, Value> = pairs
                .iter()
                .filter_map(|(k, v)| {
                    let key = k.strip_prefix(&prefix)?.strip_suffix(']')?;
                    Some((key.to_string(), Value::String(v.clone())))
                })
                .collect();
            (!map.is_empty()).then_some(Value::Object(map))
        }
        (_, Shape::Object) if param.explode => {
            let names = param
                .schema
                .map(|id| property_names(schemas, id))
                .unwrap_or_default();
            let map: Map<String, Value> = pairs
                .iter()
                .filter(|(k, _)| names.contains(k))
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            (!map.is_empty()).then_some(Value::Object(map))
        }
        (_, Shape::Object) => values.first().map(|v| flat_pairs(v.split(','))),
        (_, Shape::Array) if param.explode => (!values.is_empty()).then(|| strings(values)),
        (style, Shape::Array) => {
            let sep = match style {
                Style::SpaceDelimited => ' ',
                Style::PipeDelimited => '|',
                _ => ',',
            };
            values.first().map(|v| strings(v.split(sep)))
        }
        (_, Shape::Primitive) => values.first().map(|v| Value::String(v.to_string())),
    }
}

fn read_cookie(param: &Parameter, shape: Shape, cookies: &[(String, String)]) -> Option<Value> {
    let raw = cookies
        .iter()
        .find(|(k, _)| *k == param.name)
        .map(|(_, v)| v.as_str())?;
    Some(match shape {
        Shape::Primitive => Value::String(raw.to_string()),
        Shape::Array => strings(raw.split(',')),
        Shape::Object => flat_pairs(raw.split(',')),
    })
}
