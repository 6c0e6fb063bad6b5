//! Turns endpoint configurations into concrete requests.
//!
//! Endpoints are compiled once against the registry when the test plan is
//! built; every later call to [`CompiledEndpoint::materialize`] renders a
//! fresh request without touching the compiled form.

use crate::config::{EndpointConfig, TestConfig};
use anyhow::Context;
use datagen::{value_to_text, GenerationError, Registry, Template, TemplateValue};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Request body after rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
    Text(String),
}

/// One fully rendered request, ready for the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcreteRequest {
    pub endpoint: String,
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestBody>,
}

/// An endpoint whose templated fields have been parsed.
#[derive(Debug, Clone)]
pub struct CompiledEndpoint {
    pub name: String,
    pub method: String,
    pub timeout: Option<Duration>,
    pub delay: Option<Duration>,
    path: Template,
    params: Vec<(String, TemplateValue)>,
    headers: Vec<(String, Template)>,
    body: Option<TemplateValue>,
    json_content: bool,
}

impl CompiledEndpoint {
    /// Compile every templated field of `endpoint`.
    ///
    /// `default_headers` are merged underneath the endpoint's own headers.
    pub fn compile(
        endpoint: &EndpointConfig,
        default_headers: &BTreeMap<String, String>,
        registry: &Registry,
    ) -> anyhow::Result<Self> {
        let context = |field: &str| format!("endpoint '{}': invalid {}", endpoint.name, field);

        let method = endpoint.method.to_uppercase();
        let path = Template::compile(&endpoint.path, registry).with_context(|| context("path"))?;

        let params = endpoint
            .params
            .iter()
            .map(|(key, value)| {
                TemplateValue::compile(value, registry, &format!("params.{}", key))
                    .map(|compiled| (key.clone(), compiled))
            })
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| context("params"))?;

        let mut merged = default_headers.clone();
        merged.extend(endpoint.headers.clone());
        let headers = merged
            .iter()
            .map(|(name, value)| {
                Template::compile(value, registry)
                    .map_err(|e| e.at(format!("headers.{}", name)))
                    .map(|compiled| (name.clone(), compiled))
            })
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| context("headers"))?;

        let body = endpoint
            .data
            .as_ref()
            .filter(|_| carries_body(&method))
            .map(|data| TemplateValue::compile(data, registry, "data"))
            .transpose()
            .with_context(|| context("data"))?;

        Ok(Self {
            name: endpoint.name.clone(),
            method,
            timeout: endpoint
                .timeout
                .map(Duration::try_from_secs_f64)
                .transpose()
                .with_context(|| context("timeout"))?,
            delay: endpoint.delay.map(Duration::from_millis),
            path,
            params,
            headers,
            body,
            json_content: endpoint.json_content,
        })
    }

    /// Render one concrete request; each directive occurrence is drawn
    /// independently.
    pub fn materialize<R: Rng + ?Sized>(
        &self,
        registry: &Registry,
        rng: &mut R,
    ) -> Result<ConcreteRequest, GenerationError> {
        let path = self.path.render_string(registry, rng)?;

        let mut query = Vec::with_capacity(self.params.len());
        for (key, template) in &self.params {
            match template.render(registry, rng)? {
                // Sequences become repeated keys
                Value::Array(items) => {
                    query.extend(items.iter().map(|item| (key.clone(), value_to_text(item))))
                }
                value => query.push((key.clone(), value_to_text(&value))),
            }
        }

        let headers = self
            .headers
            .iter()
            .map(|(name, template)| Ok((name.clone(), template.render_string(registry, rng)?)))
            .collect::<Result<Vec<_>, GenerationError>>()?;

        let body = match &self.body {
            Some(template) => Some(self.encode_body(template.render(registry, rng)?)),
            None => None,
        };

        Ok(ConcreteRequest {
            endpoint: self.name.clone(),
            method: self.method.clone(),
            path,
            query,
            headers,
            body,
        })
    }

    fn encode_body(&self, value: Value) -> RequestBody {
        match value {
            Value::String(text) => RequestBody::Text(text),
            value if self.json_content => RequestBody::Json(value),
            Value::Object(fields) => RequestBody::Form(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), value_to_text(value)))
                    .collect(),
            ),
            other => RequestBody::Text(value_to_text(&other)),
        }
    }
}

fn carries_body(method: &str) -> bool {
    !matches!(method, "GET" | "HEAD")
}

/// The compiled form of a whole test configuration.
#[derive(Debug, Clone)]
pub struct TestPlan {
    pub registry: Arc<Registry>,
    pub endpoints: Arc<Vec<CompiledEndpoint>>,
}

impl TestPlan {
    /// Build the registry and compile every endpoint, failing on the first
    /// configuration error.
    pub fn compile(config: &TestConfig) -> anyhow::Result<Self> {
        let registry = config.registry().context("invalid generator configuration")?;
        let endpoints = config
            .endpoints
            .iter()
            .map(|endpoint| CompiledEndpoint::compile(endpoint, &config.default_headers, &registry))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            registry: Arc::new(registry),
            endpoints: Arc::new(endpoints),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn config() -> TestConfig {
        TestConfig::from_yaml(
            r#"
base_url: http://localhost:8000
default_headers:
  Accept: application/json
  X-Client: load-test
variables:
  api_version: v2
  page_size: 25
datasets:
  cities: [London, Paris]
endpoints:
  - name: Get Item
    path: /api/${api_version}/items/$random{1,100}
    params:
      limit: "${page_size}"
      tags: [a, "$random{x,y}"]
    headers:
      X-Client: custom
      X-Request-Id: $uuid
  - name: Create Order
    method: post
    path: /orders
    data:
      order_id: $uuid
      items:
        - { sku: "$uuid", qty: "$random{1,5}" }
        - { sku: "$uuid", qty: 2 }
  - name: Login
    method: POST
    path: /login
    json_content: false
    data:
      user: $random{cities}
      attempt: 1
  - name: Search
    path: /search
    data:
      ignored: true
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_path_params_and_headers() {
        let plan = TestPlan::compile(&config()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let request = plan.endpoints[0]
            .materialize(&plan.registry, &mut rng)
            .unwrap();

        assert_eq!(request.method, "GET");
        assert!(request.path.starts_with("/api/v2/items/"));
        let id: i64 = request.path.rsplit('/').next().unwrap().parse().unwrap();
        assert!((1..=100).contains(&id));

        assert_eq!(request.query[0], ("limit".to_string(), "25".to_string()));
        assert_eq!(request.query.len(), 3);
        assert_eq!(request.query[1], ("tags".to_string(), "a".to_string()));

        let header = |name: &str| {
            request
                .headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(header("Accept").as_deref(), Some("application/json"));
        assert_eq!(header("X-Client").as_deref(), Some("custom"));
        assert!(uuid::Uuid::parse_str(&header("X-Request-Id").unwrap()).is_ok());
        assert!(request.body.is_none());
    }

    #[test]
    fn test_body_occurrences_are_independent() {
        let plan = TestPlan::compile(&config()).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let request = plan.endpoints[1]
            .materialize(&plan.registry, &mut rng)
            .unwrap();
        assert_eq!(request.method, "POST");

        let Some(RequestBody::Json(body)) = request.body else {
            panic!("expected a JSON body");
        };
        let first = body["items"][0]["sku"].as_str().unwrap();
        let second = body["items"][1]["sku"].as_str().unwrap();
        assert_ne!(first, second);
        assert_ne!(body["order_id"], body["items"][0]["sku"]);
        assert_eq!(body["items"][1]["qty"], json!(2));
    }

    #[test]
    fn test_materialize_leaves_endpoint_reusable() {
        let plan = TestPlan::compile(&config()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let endpoint = &plan.endpoints[1];
        let a = endpoint.materialize(&plan.registry, &mut rng).unwrap();
        let b = endpoint.materialize(&plan.registry, &mut rng).unwrap();
        assert_eq!(a.path, b.path);
        assert_ne!(a.body, b.body);
    }

    #[test]
    fn test_form_body() {
        let plan = TestPlan::compile(&config()).unwrap();
        let request = plan.endpoints[2]
            .materialize(&plan.registry, &mut StdRng::seed_from_u64(4))
            .unwrap();
        let Some(RequestBody::Form(pairs)) = request.body else {
            panic!("expected a form body");
        };
        assert_eq!(pairs[0], ("attempt".to_string(), "1".to_string()));
        assert_eq!(pairs[1].0, "user");
        assert!(pairs[1].1 == "London" || pairs[1].1 == "Paris");
    }

    #[test]
    fn test_get_never_carries_body() {
        let plan = TestPlan::compile(&config()).unwrap();
        let request = plan.endpoints[3]
            .materialize(&plan.registry, &mut StdRng::seed_from_u64(5))
            .unwrap();
        assert!(request.body.is_none());
    }

    #[test]
    fn test_compile_error_names_endpoint_and_field() {
        let mut config = config();
        config.endpoints[1].data = Some(json!({"items": [{"sku": "$range{missing}"}]}));
        let err = TestPlan::compile(&config).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Create Order"), "{}", message);
        assert!(message.contains("data.items[0].sku"), "{}", message);
    }
}
