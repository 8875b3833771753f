//! PII Sanitizer
//!
//! Strips configured personal fields from payloads before they are cached.
//! Fails closed: a payload whose shape is not understood is rejected, and the
//! caller serves it live without storing it.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::error::CacheSanitizationError;

/// Policy key whose fields are stripped from every type.
pub const WILDCARD: &str = "*";

/// Deeper payloads are refused rather than walked.
pub const MAX_SANITIZE_DEPTH: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    policies: HashMap<String, HashSet<String>>,
}

impl Sanitizer {
    pub fn new(pii_fields: &HashMap<String, Vec<String>>) -> Self {
        let policies = pii_fields
            .iter()
            .map(|(resource_type, fields)| (resource_type.clone(), fields.iter().cloned().collect()))
            .collect();
        Self { policies }
    }

    /// Returns a copy of `payload` without any PII field, at any depth.
    ///
    /// Fields are stripped according to the policies of `resource_type`, of the
    /// wildcard entry, and of every `__typename` on the path from the root to
    /// the field, so a customer nested inside an order is covered by both.
    pub fn sanitize(
        &self,
        payload: &Value,
        resource_type: Option<&str>,
    ) -> Result<Value, CacheSanitizationError> {
        if !payload.is_object() {
            return Err(CacheSanitizationError::UnrecognizedShape(shape_name(payload)));
        }

        let mut scope: Vec<String> = vec![WILDCARD.to_string()];
        scope.extend(resource_type.map(str::to_string));
        self.clean(payload, &mut scope, 0)
    }

    fn clean(
        &self,
        value: &Value,
        scope: &mut Vec<String>,
        depth: usize,
    ) -> Result<Value, CacheSanitizationError> {
        if depth > MAX_SANITIZE_DEPTH {
            return Err(CacheSanitizationError::TooDeep(MAX_SANITIZE_DEPTH));
        }

        match value {
            Value::Object(map) => {
                let type_name = map.get("__typename").and_then(Value::as_str);
                if let Some(type_name) = type_name {
                    scope.push(type_name.to_string());
                }

                let mut cleaned = Map::with_capacity(map.len());
                for (field, child) in map {
                    if self.is_pii(scope, field) {
                        continue;
                    }
                    cleaned.insert(field.clone(), self.clean(child, scope, depth + 1)?);
                }

                if type_name.is_some() {
                    scope.pop();
                }
                Ok(Value::Object(cleaned))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.clean(item, scope, depth + 1))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            scalar => Ok(scalar.clone()),
        }
    }

    fn is_pii(&self, scope: &[String], field: &str) -> bool {
        scope
            .iter()
            .filter_map(|resource_type| self.policies.get(resource_type))
            .any(|fields| fields.contains(field))
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
