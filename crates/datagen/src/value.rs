//! Templates embedded in JSON trees (request bodies, query params).

use crate::error::{ConfigError, GenerationError};
use crate::registry::Registry;
use crate::template::Template;
use rand::Rng;
use serde_json::{Map, Value};

/// A JSON tree whose string leaves may contain directives.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    /// A leaf with nothing to generate.
    Literal(Value),
    Template(Template),
    Array(Vec<TemplateValue>),
    Object(Vec<(String, TemplateValue)>),
}

impl TemplateValue {
    /// Compile every string leaf of `value`.
    ///
    /// `location` names the root (e.g. `body`) and is extended with keys and
    /// indices so errors point at the offending leaf.
    pub fn compile(
        value: &Value,
        registry: &Registry,
        location: &str,
    ) -> Result<Self, ConfigError> {
        match value {
            Value::String(s) => {
                let template =
                    Template::compile(s, registry).map_err(|e| e.at(location.to_string()))?;
                if template.is_literal() {
                    Ok(TemplateValue::Literal(Value::String(
                        template.render_literal(),
                    )))
                } else {
                    Ok(TemplateValue::Template(template))
                }
            }
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| Self::compile(item, registry, &format!("{}[{}]", location, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(TemplateValue::Array),
            Value::Object(fields) => fields
                .iter()
                .map(|(key, item)| {
                    Self::compile(item, registry, &format!("{}.{}", location, key))
                        .map(|compiled| (key.clone(), compiled))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(TemplateValue::Object),
            other => Ok(TemplateValue::Literal(other.clone())),
        }
    }

    /// Render a fresh concrete value; every directive is evaluated anew.
    pub fn render<R: Rng + ?Sized>(
        &self,
        registry: &Registry,
        rng: &mut R,
    ) -> Result<Value, GenerationError> {
        match self {
            TemplateValue::Literal(value) => Ok(value.clone()),
            TemplateValue::Template(template) => template.render(registry, rng),
            TemplateValue::Array(items) => items
                .iter()
                .map(|item| item.render(registry, rng))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            TemplateValue::Object(fields) => {
                let mut map = Map::with_capacity(fields.len());
                for (key, item) in fields {
                    map.insert(key.clone(), item.render(registry, rng)?);
                }
                Ok(Value::Object(map))
            }
        }
    }
}

/// Text form of a generated value for paths, headers and query strings.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    #[test]
    fn test_compile_keeps_non_string_leaves() {
        let registry = Registry::default();
        let compiled = TemplateValue::compile(
            &json!({"qty": 3, "gift": false, "note": null}),
            &registry,
            "body",
        )
        .unwrap();
        let rendered = compiled
            .render(&registry, &mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(rendered, json!({"qty": 3, "gift": false, "note": null}));
    }

    #[test]
    fn test_error_location_points_at_leaf() {
        let registry = Registry::default();
        let err = TemplateValue::compile(
            &json!({"items": [{"sku": "ok"}, {"sku": "$bogus"}]}),
            &registry,
            "body",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "at body.items[1].sku");
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&json!("a")), "a");
        assert_eq!(value_to_text(&json!(12)), "12");
        assert_eq!(value_to_text(&json!(true)), "true");
        assert_eq!(value_to_text(&Value::Null), "");
    }
}
