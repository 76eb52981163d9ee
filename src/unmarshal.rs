//! Schema-driven casting and validation.
//!
//! Walks a value against a schema node depth-first and produces either the
//! typed value or every leaf error found. Siblings never short-circuit each
//! other: one bad property and one bad array element give two errors.
//!
//! Values arrive from one of two sources. JSON bodies are already typed, so
//! only type equality is checked (integers widen to number). Parameters and
//! form fields arrive as strings and are cast with strict lexical rules.

use std::collections::HashSet;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use base64::Engine;
use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Number, Value};

use crate::contract::{
    Additional, ArrayRules, NumberRules, ObjectRules, Schema, SchemaArena, SchemaId, SchemaKind,
    StringRules,
};
use crate::error::{ErrorKind, PathKey, ValidationError};
use crate::types::{Direction, DEFAULT_MAX_DEPTH};

/// Where a raw value came from, which decides how it is cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Decoded JSON: types must already match.
    Json,
    /// Text: string leaves are cast to the declared primitive type.
    Lexical,
}

/// Casts and validates values against schemas of one contract.
#[derive(Debug, Clone)]
pub struct Unmarshaller<'c> {
    schemas: &'c SchemaArena,
    direction: Direction,
    max_depth: usize,
}

/// Traversal state: current location and collected errors.
struct Walk {
    path: Vec<PathKey>,
    errors: Vec<ValidationError>,
}

impl Walk {
    fn new(path: Vec<PathKey>) -> Self {
        Self {
            path,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, message: String) {
        self.errors.push(
            ValidationError::new(ErrorKind::InvalidSchemaValue, message)
                .with_path(self.path.clone()),
        );
    }
}

impl<'c> Unmarshaller<'c> {
    pub fn new(schemas: &'c SchemaArena, direction: Direction) -> Self {
        Self {
            schemas,
            direction,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn schemas(&self) -> &'c SchemaArena {
        self.schemas
    }

    /// Cast and validate `value` against `schema`.
    ///
    /// # Errors
    ///
    /// Returns every `InvalidSchemaValue` error found in the value, in
    /// traversal order.
    pub fn unmarshal(
        &self,
        schema: SchemaId,
        value: &Value,
        source: Source,
    ) -> Result<Value, Vec<ValidationError>> {
        let mut walk = Walk::new(Vec::new());
        let result = self.visit(schema, value, source, 0, &mut walk);
        match result {
            Some(casted) if walk.errors.is_empty() => Ok(casted),
            _ => Err(walk.errors),
        }
    }

    /// Returns `None` exactly when this call added errors.
    fn visit(
        &self,
        id: SchemaId,
        value: &Value,
        source: Source,
        depth: usize,
        walk: &mut Walk,
    ) -> Option<Value> {
        let schema = self.schemas.get(id);
        if depth >= self.max_depth {
            tracing::warn!(max_depth = self.max_depth, "schema nesting limit reached");
            walk.fail(invalid(
                value,
                schema,
                format!(
                    "schema nesting exceeds maximum depth of {}",
                    self.max_depth
                ),
            ));
            return None;
        }

        if value.is_null() && (schema.nullable || matches!(schema.kind, SchemaKind::Null)) {
            return Some(Value::Null);
        }

        let before = walk.errors.len();
        let mut result = match &schema.kind {
            SchemaKind::Any => Some(value.clone()),
            SchemaKind::Array(rules) => self.visit_array(schema, rules, value, source, depth, walk),
            SchemaKind::Object(rules) => {
                self.visit_object(schema, rules, value, source, depth, walk)
            }
            primitive => match cast_primitive(primitive, value, source) {
                Some(casted) => Some(casted),
                None => {
                    walk.fail(cast_failure(value, schema));
                    None
                }
            },
        };

        if let Some(casted) = &result {
            check_constraints(schema, casted, walk);
        }

        if result.is_some()
            && !(schema.all_of.is_empty() && schema.any_of.is_empty() && schema.one_of.is_empty())
        {
            result = result.map(|casted| {
                self.visit_composites(schema, value, casted, source, depth, walk)
            });
        }

        if walk.errors.len() > before {
            None
        } else {
            result
        }
    }

    /// Visit on a scratch walk; `Some` only when the branch is error-free.
    fn try_visit(
        &self,
        id: SchemaId,
        value: &Value,
        source: Source,
        depth: usize,
        path: &[PathKey],
    ) -> Option<Value> {
        let mut scratch = Walk::new(path.to_vec());
        self.visit(id, value, source, depth, &mut scratch)
            .filter(|_| scratch.errors.is_empty())
    }

    fn visit_composites(
        &self,
        schema: &Schema,
        raw: &Value,
        casted: Value,
        source: Source,
        depth: usize,
        walk: &mut Walk,
    ) -> Value {
        let mut merged = casted;

        for &branch in &schema.all_of {
            if let Some(v) = self.visit(branch, raw, source, depth + 1, walk) {
                merged = merge(merged, v, raw);
            }
        }

        if !schema.any_of.is_empty() {
            let found = schema
                .any_of
                .iter()
                .find_map(|&branch| self.try_visit(branch, raw, source, depth + 1, &walk.path));
            match found {
                Some(v) => merged = merge(merged, v, raw),
                None => walk.fail(invalid(raw, schema, "does not match any schema in anyOf")),
            }
        }

        if !schema.one_of.is_empty() {
            let mut matches: Vec<Value> = schema
                .one_of
                .iter()
                .filter_map(|&branch| self.try_visit(branch, raw, source, depth + 1, &walk.path))
                .collect();
            match matches.len() {
                0 => walk.fail(invalid(raw, schema, "does not match any schema in oneOf")),
                1 => {
                    if let Some(v) = matches.pop() {
                        merged = merge(merged, v, raw);
                    }
                }
                n => walk.fail(invalid(
                    raw,
                    schema,
                    format!("matches {} schemas in oneOf, expected exactly one", n),
                )),
            }
        }

        merged
    }

    fn visit_array(
        &self,
        schema: &Schema,
        rules: &ArrayRules,
        value: &Value,
        source: Source,
        depth: usize,
        walk: &mut Walk,
    ) -> Option<Value> {
        let Value::Array(items) = value else {
            walk.fail(cast_failure(value, schema));
            return None;
        };

        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            walk.path.push(PathKey::Index(i));
            let casted = match rules.items {
                Some(id) => self.visit(id, item, source, depth + 1, walk),
                None => Some(item.clone()),
            };
            walk.path.pop();
            out.extend(casted);
        }

        if let Some(min) = rules.min_items {
            if items.len() < min {
                walk.fail(invalid(value, schema, format!("must have at least {} items", min)));
            }
        }
        if let Some(max) = rules.max_items {
            if items.len() > max {
                walk.fail(invalid(value, schema, format!("must have at most {} items", max)));
            }
        }
        if rules.unique_items {
            let mut seen = HashSet::new();
            if !out.iter().all(|v| seen.insert(v.to_string())) {
                walk.fail(invalid(value, schema, "items must be unique"));
            }
        }

        Some(Value::Array(out))
    }

    fn visit_object(
        &self,
        schema: &Schema,
        rules: &ObjectRules,
        value: &Value,
        source: Source,
        depth: usize,
        walk: &mut Walk,
    ) -> Option<Value> {
        let Value::Object(map) = value else {
            walk.fail(cast_failure(value, schema));
            return None;
        };

        let mut out = Map::new();
        for (name, &prop_id) in &rules.properties {
            let prop = self.schemas.get(prop_id);
            let hidden = match self.direction {
                Direction::Request => prop.read_only,
                Direction::Response => prop.write_only,
            };

            walk.path.push(PathKey::Property(name.clone()));
            match map.get(name) {
                Some(_) if hidden => {
                    let access = match self.direction {
                        Direction::Request => "read-only",
                        Direction::Response => "write-only",
                    };
                    walk.fail(format!("Property {} is {}", name, access));
                }
                Some(v) => {
                    if let Some(casted) = self.visit(prop_id, v, source, depth + 1, walk) {
                        out.insert(name.clone(), casted);
                    }
                }
                None => {
                    if rules.required.contains(name) && !hidden {
                        walk.fail(format!("Missing required property: {}", name));
                    } else if let Some(default) = &prop.default {
                        out.insert(name.clone(), default.clone());
                    }
                }
            }
            walk.path.pop();
        }

        for name in &rules.required {
            if !rules.properties.contains_key(name) && !map.contains_key(name) {
                walk.path.push(PathKey::Property(name.clone()));
                walk.fail(format!("Missing required property: {}", name));
                walk.path.pop();
            }
        }

        for (name, v) in map {
            if rules.properties.contains_key(name) {
                continue;
            }
            match rules.additional {
                Additional::Allowed => {
                    out.insert(name.clone(), v.clone());
                }
                Additional::Forbidden => {
                    walk.path.push(PathKey::Property(name.clone()));
                    walk.fail(format!("Additional property {} is not allowed", name));
                    walk.path.pop();
                }
                Additional::Schema(id) => {
                    walk.path.push(PathKey::Property(name.clone()));
                    if let Some(casted) = self.visit(id, v, source, depth + 1, walk) {
                        out.insert(name.clone(), casted);
                    }
                    walk.path.pop();
                }
            }
        }

        if let Some(min) = rules.min_properties {
            if map.len() < min {
                walk.fail(invalid(
                    value,
                    schema,
                    format!("must have at least {} properties", min),
                ));
            }
        }
        if let Some(max) = rules.max_properties {
            if map.len() > max {
                walk.fail(invalid(
                    value,
                    schema,
                    format!("must have at most {} properties", max),
                ));
            }
        }

        Some(Value::Object(out))
    }
}

/// Value as shown in messages: strings unquoted, everything else as JSON.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn invalid(value: &Value, schema: &Schema, reason: impl fmt::Display) -> String {
    format!(
        "Value {} not valid for schema of type {}: {}",
        display(value),
        schema.kind.type_name(),
        reason
    )
}

fn cast_failure(value: &Value, schema: &Schema) -> String {
    invalid(
        value,
        schema,
        format!(
            "Failed to cast value {} to type {}",
            display(value),
            schema.kind.type_name()
        ),
    )
}

fn cast_primitive(kind: &SchemaKind, value: &Value, source: Source) -> Option<Value> {
    match (kind, value) {
        (SchemaKind::Boolean, Value::Bool(_)) => Some(value.clone()),
        (SchemaKind::Integer(_), Value::Number(n)) if n.is_i64() || n.is_u64() => {
            Some(value.clone())
        }
        (SchemaKind::Number(_), Value::Number(_)) => Some(value.clone()),
        (SchemaKind::String(_), Value::String(_)) => Some(value.clone()),
        (_, Value::String(s)) if source == Source::Lexical => cast_lexical(kind, s),
        _ => None,
    }
}

/// Strict text casts: no partial parses, no case folding.
fn cast_lexical(kind: &SchemaKind, s: &str) -> Option<Value> {
    match kind {
        SchemaKind::Boolean => match s {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        SchemaKind::Integer(_) => s
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| s.parse::<u64>().map(Value::from))
            .ok(),
        SchemaKind::Number(_) => s
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .and_then(Number::from_f64)
            .map(Value::Number),
        SchemaKind::Null => (s == "null").then_some(Value::Null),
        _ => None,
    }
}

fn check_constraints(schema: &Schema, value: &Value, walk: &mut Walk) {
    if let Some(allowed) = &schema.enumeration {
        if !allowed.iter().any(|a| values_equal(a, value)) {
            walk.fail(invalid(
                value,
                schema,
                format!("value is not one of {}", Value::Array(allowed.clone())),
            ));
        }
    }

    match (&schema.kind, value) {
        (SchemaKind::Integer(rules) | SchemaKind::Number(rules), Value::Number(n)) => {
            if let Some(x) = n.as_f64() {
                if let Some(reason) = check_number(rules, x) {
                    walk.fail(invalid(value, schema, reason));
                }
            }
        }
        (SchemaKind::String(rules), Value::String(s)) => {
            for reason in check_string(rules, s) {
                walk.fail(invalid(value, schema, reason));
            }
        }
        _ => {}
    }

    if let Some(format) = &schema.format {
        if !format_matches(format, value) {
            walk.fail(invalid(
                value,
                schema,
                format!("Failed to format value {} to format {}", display(value), format),
            ));
        }
    }
}

fn check_number(rules: &NumberRules, x: f64) -> Option<String> {
    if let Some(min) = rules.minimum {
        if rules.exclusive_minimum && x <= min {
            return Some(format!("must be greater than {}", fmt_number(min)));
        }
        if x < min {
            return Some(format!(
                "must be greater than or equal to {}",
                fmt_number(min)
            ));
        }
    }
    if let Some(max) = rules.maximum {
        if rules.exclusive_maximum && x >= max {
            return Some(format!("must be less than {}", fmt_number(max)));
        }
        if x > max {
            return Some(format!("must be less than or equal to {}", fmt_number(max)));
        }
    }
    if let Some(step) = rules.multiple_of.filter(|m| *m > 0.0) {
        let q = x / step;
        if (q - q.round()).abs() > 1e-9 {
            return Some(format!("must be a multiple of {}", fmt_number(step)));
        }
    }
    None
}

fn check_string(rules: &StringRules, s: &str) -> Vec<String> {
    let mut reasons = Vec::new();
    let len = s.chars().count();
    if let Some(min) = rules.min_length {
        if len < min {
            reasons.push(format!("must be at least {} characters long", min));
        }
    }
    if let Some(max) = rules.max_length {
        if len > max {
            reasons.push(format!("must be at most {} characters long", max));
        }
    }
    if let Some(pattern) = &rules.pattern {
        if !pattern.is_match(s) {
            reasons.push(format!("does not match pattern {}", pattern.as_str()));
        }
    }
    reasons
}

/// Unknown formats always match.
fn format_matches(format: &str, value: &Value) -> bool {
    match (format, value) {
        ("int32", Value::Number(n)) => n.as_i64().is_some_and(|i| i32::try_from(i).is_ok()),
        ("int64", Value::Number(n)) => n.is_i64(),
        ("date", Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        ("date-time", Value::String(s)) => DateTime::parse_from_rfc3339(s).is_ok(),
        ("uuid", Value::String(s)) => uuid::Uuid::parse_str(s).is_ok(),
        ("ipv4", Value::String(s)) => s.parse::<Ipv4Addr>().is_ok(),
        ("ipv6", Value::String(s)) => s.parse::<Ipv6Addr>().is_ok(),
        ("byte", Value::String(s)) => base64::engine::general_purpose::STANDARD
            .decode(s)
            .is_ok(),
        _ => true,
    }
}

fn fmt_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Combine a composition branch's result into the value built so far.
///
/// Whichever side actually transformed the raw input wins, so a branch that
/// merely passes a field through doesn't undo a cast made elsewhere.
fn merge(base: Value, addition: Value, raw: &Value) -> Value {
    match (base, addition) {
        (Value::Object(mut base), Value::Object(addition)) => {
            for (key, value) in addition {
                let untouched = match base.get(&key) {
                    Some(existing) => raw.get(&key) == Some(existing),
                    None => true,
                };
                if untouched {
                    base.insert(key, value);
                }
            }
            Value::Object(base)
        }
        (base, addition) => {
            if &base == raw {
                addition
            } else {
                base
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Contract;
    use crate::loader::build_contract;
    use serde_json::json;

    fn contract(schemas: Value) -> Contract {
        build_contract(&json!({
            "openapi": "3.0.3",
            "info": { "title": "t", "version": "1" },
            "paths": {},
            "components": { "schemas": schemas }
        }))
        .unwrap()
    }

    fn run(
        c: &Contract,
        name: &str,
        value: Value,
        source: Source,
    ) -> Result<Value, Vec<ValidationError>> {
        run_as(c, name, value, source, Direction::Request)
    }

    fn run_as(
        c: &Contract,
        name: &str,
        value: Value,
        source: Source,
        direction: Direction,
    ) -> Result<Value, Vec<ValidationError>> {
        let id = c.schemas.by_name(name).unwrap();
        Unmarshaller::new(&c.schemas, direction).unmarshal(id, &value, source)
    }

    mod casting {
        use super::*;

        #[test]
        fn lexical_integer() {
            let c = contract(json!({ "Id": { "type": "integer" } }));
            assert_eq!(run(&c, "Id", json!("12"), Source::Lexical).unwrap(), json!(12));
            assert_eq!(run(&c, "Id", json!("-3"), Source::Lexical).unwrap(), json!(-3));
        }

        #[test]
        fn lexical_integer_failure_message() {
            let c = contract(json!({ "Id": { "type": "integer" } }));
            let errors = run(&c, "Id", json!("invalidparameter"), Source::Lexical).unwrap_err();
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].kind, ErrorKind::InvalidSchemaValue);
            assert_eq!(
                errors[0].message,
                "Value invalidparameter not valid for schema of type integer: \
                 Failed to cast value invalidparameter to type integer"
            );
        }

        #[test]
        fn lexical_integer_rejects_partial() {
            let c = contract(json!({ "Id": { "type": "integer" } }));
            assert!(run(&c, "Id", json!("12abc"), Source::Lexical).is_err());
            assert!(run(&c, "Id", json!("12.0"), Source::Lexical).is_err());
            assert!(run(&c, "Id", json!(" 12"), Source::Lexical).is_err());
        }

        #[test]
        fn lexical_boolean_is_strict() {
            let c = contract(json!({ "Flag": { "type": "boolean" } }));
            assert_eq!(run(&c, "Flag", json!("true"), Source::Lexical).unwrap(), json!(true));
            assert!(run(&c, "Flag", json!("True"), Source::Lexical).is_err());
            assert!(run(&c, "Flag", json!("1"), Source::Lexical).is_err());
        }

        #[test]
        fn lexical_number_rejects_non_finite() {
            let c = contract(json!({ "N": { "type": "number" } }));
            assert_eq!(run(&c, "N", json!("1.5"), Source::Lexical).unwrap(), json!(1.5));
            assert!(run(&c, "N", json!("NaN"), Source::Lexical).is_err());
            assert!(run(&c, "N", json!("inf"), Source::Lexical).is_err());
        }

        #[test]
        fn json_types_must_match() {
            let c = contract(json!({ "S": { "type": "string" }, "I": { "type": "integer" } }));
            let errors = run(&c, "S", json!(123), Source::Json).unwrap_err();
            assert_eq!(
                errors[0].message,
                "Value 123 not valid for schema of type string: \
                 Failed to cast value 123 to type string"
            );
            // JSON strings are not cast
            assert!(run(&c, "I", json!("12"), Source::Json).is_err());
            assert!(run(&c, "I", json!(1.5), Source::Json).is_err());
        }

        #[test]
        fn json_integer_widens_to_number() {
            let c = contract(json!({ "N": { "type": "number" } }));
            assert_eq!(run(&c, "N", json!(3), Source::Json).unwrap(), json!(3));
        }

        #[test]
        fn nullable_accepts_null() {
            let c = contract(json!({
                "Maybe": { "type": "integer", "nullable": true, "minimum": 5 },
                "Never": { "type": "integer" }
            }));
            assert_eq!(run(&c, "Maybe", json!(null), Source::Json).unwrap(), json!(null));
            assert!(run(&c, "Never", json!(null), Source::Json).is_err());
        }

        #[test]
        fn untyped_schema_passes_anything() {
            let c = contract(json!({ "Any": {} }));
            assert_eq!(
                run(&c, "Any", json!({"x": [1]}), Source::Json).unwrap(),
                json!({"x": [1]})
            );
        }
    }

    mod constraints {
        use super::*;

        #[test]
        fn numeric_bounds() {
            let c = contract(json!({
                "Age": { "type": "integer", "minimum": 0, "maximum": 150 },
                "Ratio": { "type": "number", "exclusiveMinimum": true, "minimum": 0, "multipleOf": 0.5 }
            }));
            assert!(run(&c, "Age", json!(30), Source::Json).is_ok());
            let errors = run(&c, "Age", json!(200), Source::Json).unwrap_err();
            assert_eq!(
                errors[0].message,
                "Value 200 not valid for schema of type integer: must be less than or equal to 150"
            );
            assert!(run(&c, "Ratio", json!(0), Source::Json).is_err());
            assert!(run(&c, "Ratio", json!(1.5), Source::Json).is_ok());
            assert!(run(&c, "Ratio", json!(1.2), Source::Json).is_err());
        }

        #[test]
        fn string_rules_collect() {
            let c = contract(json!({
                "Code": { "type": "string", "minLength": 3, "pattern": "^[A-Z]+$" }
            }));
            let errors = run(&c, "Code", json!("ab"), Source::Json).unwrap_err();
            assert_eq!(errors.len(), 2);
            assert!(run(&c, "Code", json!("ABC"), Source::Json).is_ok());
        }

        #[test]
        fn enum_after_cast() {
            let c = contract(json!({ "Level": { "type": "integer", "enum": [1, 2, 3] } }));
            assert_eq!(run(&c, "Level", json!("2"), Source::Lexical).unwrap(), json!(2));
            let errors = run(&c, "Level", json!("7"), Source::Lexical).unwrap_err();
            assert!(errors[0].message.contains("value is not one of [1,2,3]"));
        }

        #[test]
        fn formats() {
            let c = contract(json!({
                "When": { "type": "string", "format": "date-time" },
                "Day": { "type": "string", "format": "date" },
                "Id": { "type": "string", "format": "uuid" },
                "Small": { "type": "integer", "format": "int32" },
                "Custom": { "type": "string", "format": "slug" }
            }));
            assert!(run(&c, "When", json!("2024-05-01T10:00:00Z"), Source::Json).is_ok());
            assert!(run(&c, "When", json!("yesterday"), Source::Json).is_err());
            assert!(run(&c, "Day", json!("2024-02-30"), Source::Json).is_err());
            let id = json!("67e55044-10b1-426f-9247-bb680e5fe0c8");
            assert!(run(&c, "Id", id, Source::Json).is_ok());
            assert!(run(&c, "Small", json!(3_000_000_000_i64), Source::Json).is_err());
            assert!(run(&c, "Custom", json!("anything"), Source::Json).is_ok());
        }

        #[test]
        fn array_rules() {
            let c = contract(json!({
                "Tags": { "type": "array", "items": { "type": "string" }, "minItems": 1, "uniqueItems": true }
            }));
            assert!(run(&c, "Tags", json!(["a", "b"]), Source::Json).is_ok());
            assert!(run(&c, "Tags", json!([]), Source::Json).is_err());
            assert!(run(&c, "Tags", json!(["a", "a"]), Source::Json).is_err());
        }
    }

    mod objects {
        use super::*;

        fn pet() -> Contract {
            contract(json!({
                "Pet": {
                    "type": "object",
                    "required": ["name", "id"],
                    "properties": {
                        "id": { "type": "integer", "readOnly": true },
                        "name": { "type": "string" },
                        "age": { "type": "integer" },
                        "tags": { "type": "array", "items": { "type": "string" } },
                        "kind": { "type": "string", "default": "dog" },
                        "secret": { "type": "string", "writeOnly": true }
                    }
                }
            }))
        }

        #[test]
        fn collects_sibling_errors() {
            let c = pet();
            let errors = run(
                &c,
                "Pet",
                json!({ "name": "Rex", "age": "old", "tags": ["a", 5] }),
                Source::Json,
            )
            .unwrap_err();
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[0].pointer(), "/age");
            assert_eq!(errors[1].pointer(), "/tags/1");
        }

        #[test]
        fn each_missing_required_is_an_error() {
            let c = pet();
            let errors =
                run_as(&c, "Pet", json!({}), Source::Json, Direction::Response).unwrap_err();
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[0].message, "Missing required property: id");
            assert_eq!(errors[1].message, "Missing required property: name");
        }

        #[test]
        fn read_only_rules_in_request() {
            let c = pet();
            // not required in requests
            assert!(run(&c, "Pet", json!({ "name": "Rex" }), Source::Json).is_ok());
            // and not accepted either
            let errors =
                run(&c, "Pet", json!({ "name": "Rex", "id": 1 }), Source::Json).unwrap_err();
            assert_eq!(errors[0].message, "Property id is read-only");
        }

        #[test]
        fn write_only_rules_in_response() {
            let c = pet();
            let errors = run_as(
                &c,
                "Pet",
                json!({ "id": 1, "name": "Rex", "secret": "x" }),
                Source::Json,
                Direction::Response,
            )
            .unwrap_err();
            assert_eq!(errors[0].message, "Property secret is write-only");
        }

        #[test]
        fn fills_defaults_and_passes_unknown() {
            let c = pet();
            let out =
                run(&c, "Pet", json!({ "name": "Rex", "extra": true }), Source::Json).unwrap();
            assert_eq!(out, json!({ "name": "Rex", "kind": "dog", "extra": true }));
        }

        #[test]
        fn additional_properties_forbidden_or_typed() {
            let c = contract(json!({
                "Closed": { "type": "object", "properties": { "a": {} }, "additionalProperties": false },
                "Counts": { "type": "object", "additionalProperties": { "type": "integer" } }
            }));
            let errors = run(&c, "Closed", json!({ "a": 1, "b": 2 }), Source::Json).unwrap_err();
            assert_eq!(errors[0].message, "Additional property b is not allowed");
            assert_eq!(
                run(&c, "Counts", json!({ "x": "4" }), Source::Lexical).unwrap(),
                json!({ "x": 4 })
            );
        }

        #[test]
        fn lexical_object_fields_are_cast() {
            let c = pet();
            let out =
                run(&c, "Pet", json!({ "name": "Rex", "age": "3" }), Source::Lexical).unwrap();
            assert_eq!(out["age"], json!(3));
        }
    }

    mod composition {
        use super::*;

        #[test]
        fn all_of_collects_every_branch() {
            let c = contract(json!({
                "Named": { "type": "object", "required": ["name"], "properties": { "name": { "type": "string" } } },
                "Aged": { "type": "object", "required": ["age"], "properties": { "age": { "type": "integer" } } },
                "Both": { "allOf": [ { "$ref": "#/components/schemas/Named" }, { "$ref": "#/components/schemas/Aged" } ] }
            }));
            assert!(run(&c, "Both", json!({ "name": "a", "age": 1 }), Source::Json).is_ok());
            let errors = run(&c, "Both", json!({}), Source::Json).unwrap_err();
            assert_eq!(errors.len(), 2);
        }

        #[test]
        fn all_of_keeps_lexical_casts() {
            let c = contract(json!({
                "Base": { "type": "object", "properties": { "n": { "type": "integer" } } },
                "Wrapped": { "allOf": [ { "$ref": "#/components/schemas/Base" }, { "type": "object" } ] }
            }));
            let out = run(&c, "Wrapped", json!({ "n": "5" }), Source::Lexical).unwrap();
            assert_eq!(out, json!({ "n": 5 }));
        }

        #[test]
        fn any_of_needs_one() {
            let c = contract(json!({
                "IdOrName": { "anyOf": [ { "type": "integer" }, { "type": "string", "minLength": 2 } ] }
            }));
            assert!(run(&c, "IdOrName", json!(5), Source::Json).is_ok());
            assert!(run(&c, "IdOrName", json!("ab"), Source::Json).is_ok());
            let errors = run(&c, "IdOrName", json!("a"), Source::Json).unwrap_err();
            assert_eq!(errors.len(), 1);
            assert!(errors[0].message.ends_with("does not match any schema in anyOf"));
        }

        #[test]
        fn one_of_needs_exactly_one() {
            let c = contract(json!({
                "Num": { "oneOf": [ { "type": "integer" }, { "type": "number" } ] }
            }));
            assert!(run(&c, "Num", json!(1.5), Source::Json).is_ok());
            let errors = run(&c, "Num", json!(1), Source::Json).unwrap_err();
            assert!(errors[0].message.contains("matches 2 schemas in oneOf"));
        }
    }

    mod recursion {
        use super::*;

        #[test]
        fn self_referential_schema_validates() {
            let c = contract(json!({
                "Node": {
                    "type": "object",
                    "properties": {
                        "value": { "type": "integer" },
                        "children": { "type": "array", "items": { "$ref": "#/components/schemas/Node" } }
                    }
                }
            }));
            let tree = json!({ "value": 1, "children": [ { "value": 2, "children": [ { "value": "x" } ] } ] });
            let errors = run(&c, "Node", tree, Source::Json).unwrap_err();
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].pointer(), "/children/0/children/0/value");
        }

        #[test]
        fn cyclic_composition_hits_depth_guard() {
            let c = contract(json!({
                "Loop": { "allOf": [ { "$ref": "#/components/schemas/Loop" } ] }
            }));
            let id = c.schemas.by_name("Loop").unwrap();
            let errors = Unmarshaller::new(&c.schemas, Direction::Request)
                .max_depth(8)
                .unmarshal(id, &json!(1), Source::Json)
                .unwrap_err();
            assert_eq!(errors.len(), 1);
            assert!(errors[0].message.contains("maximum depth of 8"));
        }
    }
}
