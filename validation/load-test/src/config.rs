//! Configuration loading and management.

use anyhow::{bail, Context};
use datagen::{GeneratorSpec, RangeSpec, Registry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Upper bound, in seconds, for every timeout, delay and pacing interval.
pub const MAX_SECONDS: f64 = 86_400.0;

/// Main test configuration loaded from YAML.
///
/// Unknown top-level keys are ignored so report/CLI sections owned by other
/// tools can live in the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_num_workers")]
    pub num_workers: u32,
    #[serde(default = "default_requests_per_endpoint")]
    pub requests_per_endpoint: u32,
    #[serde(default = "default_num_test_runs")]
    pub num_test_runs: u32,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub generators: HashMap<String, GeneratorSpec>,
    #[serde(default)]
    pub datasets: HashMap<String, Vec<Value>>,
    #[serde(default)]
    pub ranges: HashMap<String, RangeSpec>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed pause between retries, in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    /// Requests per second per worker; unlimited when absent
    #[serde(default)]
    pub rate_limit: Option<f64>,
    #[serde(default)]
    pub request_delay: Option<RequestDelay>,
    #[serde(default)]
    pub seed: Option<u64>, // Optional RNG seed for reproducible payloads
    /// strftime format for `$now` (RFC 3339 when absent)
    #[serde(default)]
    pub now_format: Option<String>,
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioConfig>,
    #[serde(default)]
    pub report: ReportConfig,
}

/// One HTTP endpoint to exercise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Request body; a string starting with `@` names a file to load.
    #[serde(default)]
    pub data: Option<Value>,
    /// Per-endpoint timeout override in seconds
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default = "default_json_content")]
    pub json_content: bool,
    /// Extra pause after each request to this endpoint, in milliseconds
    #[serde(default)]
    pub delay: Option<u64>,
}

/// Pause between a worker's successive requests, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestDelay {
    Fixed(f64),
    Uniform { min: f64, max: f64 },
}

/// Named override layered over the global settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub num_workers: Option<u32>,
    #[serde(default)]
    pub requests_per_endpoint: Option<u32>,
    #[serde(default)]
    pub num_test_runs: Option<u32>,
    /// Endpoint names to run; all endpoints when absent
    #[serde(default)]
    pub endpoints: Option<Vec<String>>,
}

/// What the results hand to the report renderer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub include_request_details: bool,
    #[serde(default)]
    pub include_response_body: bool,
}

fn default_name() -> String {
    "load-test".to_string()
}

fn default_num_workers() -> u32 {
    10
}

fn default_requests_per_endpoint() -> u32 {
    100
}

fn default_num_test_runs() -> u32 {
    5
}

fn default_timeout() -> f64 {
    10.0
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_json_content() -> bool {
    true
}

impl TestConfig {
    /// Load configuration from YAML file.
    ///
    /// `@file` bodies are resolved relative to the config file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.load_body_files(path.parent().unwrap_or_else(|| Path::new(".")))?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Replace `data: "@file"` references with the file contents.
    ///
    /// `.json` files are parsed; anything else becomes a text body.
    pub fn load_body_files(&mut self, base_dir: &Path) -> anyhow::Result<()> {
        for endpoint in &mut self.endpoints {
            let file = match &endpoint.data {
                Some(Value::String(s)) if s.starts_with('@') => base_dir.join(&s[1..]),
                _ => continue,
            };

            let content = std::fs::read_to_string(&file).with_context(|| {
                format!(
                    "endpoint '{}': failed to read body file {}",
                    endpoint.name,
                    file.display()
                )
            })?;

            let body = if file.extension().and_then(|e| e.to_str()) == Some("json") {
                serde_json::from_str(&content).with_context(|| {
                    format!(
                        "endpoint '{}': invalid JSON in {}",
                        endpoint.name,
                        file.display()
                    )
                })?
            } else {
                Value::String(content)
            };
            endpoint.data = Some(body);
        }
        Ok(())
    }

    /// Overlay the named scenario: its fields replace the global ones and
    /// its endpoint list restricts which endpoints run.
    pub fn with_scenario(&self, name: &str) -> anyhow::Result<Self> {
        let Some(scenario) = self.scenarios.get(name) else {
            let known: Vec<&str> = self.scenarios.keys().map(String::as_str).collect();
            bail!("unknown scenario '{}' (available: {})", name, known.join(", "));
        };

        let mut config = self.clone();
        if let Some(workers) = scenario.num_workers {
            config.num_workers = workers;
        }
        if let Some(requests) = scenario.requests_per_endpoint {
            config.requests_per_endpoint = requests;
        }
        if let Some(runs) = scenario.num_test_runs {
            config.num_test_runs = runs;
        }

        if let Some(selected) = &scenario.endpoints {
            for wanted in selected {
                if !self.endpoints.iter().any(|e| &e.name == wanted) {
                    bail!("scenario '{}' references unknown endpoint '{}'", name, wanted);
                }
            }
            config
                .endpoints
                .retain(|endpoint| selected.contains(&endpoint.name));
        }

        Ok(config)
    }

    /// Build the generator/dataset/range/variable registry.
    pub fn registry(&self) -> anyhow::Result<Registry> {
        let registry = Registry::new(
            self.generators.clone(),
            self.datasets.clone(),
            self.ranges.clone(),
            self.variables.clone(),
        )?
        .with_now_format(self.now_format.clone())?;
        Ok(registry)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("invalid base_url '{}'", self.base_url))?;
        if self.num_workers == 0 {
            bail!("num_workers must be > 0");
        }
        if self.requests_per_endpoint == 0 {
            bail!("requests_per_endpoint must be > 0");
        }
        if self.num_test_runs == 0 {
            bail!("num_test_runs must be > 0");
        }
        if self.endpoints.is_empty() {
            bail!("at least one endpoint must be specified");
        }
        if !(self.timeout > 0.0 && self.timeout <= MAX_SECONDS) {
            bail!("timeout must be in (0, {}] seconds", MAX_SECONDS);
        }
        if !(self.retry_delay >= 0.0 && self.retry_delay <= MAX_SECONDS) {
            bail!("retry_delay must be in [0, {}] seconds", MAX_SECONDS);
        }
        if let Some(rate) = self.rate_limit {
            if !(rate >= 1.0 / MAX_SECONDS) || !rate.is_finite() {
                bail!(
                    "rate_limit must be at least one request per {} seconds",
                    MAX_SECONDS
                );
            }
        }
        if let Some(delay) = self.request_delay {
            delay.validate()?;
        }
        for name in self.default_headers.keys() {
            reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid default header name '{}'", name))?;
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint.name.as_str()) {
                bail!("duplicate endpoint name '{}'", endpoint.name);
            }
            endpoint.validate()?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay)
    }

    /// Total requests a full test will issue.
    pub fn total_requests(&self) -> u64 {
        self.num_workers as u64
            * self.requests_per_endpoint as u64
            * self.num_test_runs as u64
            * self.endpoints.len() as u64
    }
}

impl EndpointConfig {
    fn validate(&self) -> anyhow::Result<()> {
        reqwest::Method::from_bytes(self.method.to_uppercase().as_bytes())
            .with_context(|| format!("endpoint '{}': invalid method '{}'", self.name, self.method))?;
        if let Some(timeout) = self.timeout {
            if !(timeout > 0.0 && timeout <= MAX_SECONDS) {
                bail!(
                    "endpoint '{}': timeout must be in (0, {}] seconds",
                    self.name,
                    MAX_SECONDS
                );
            }
        }
        for name in self.headers.keys() {
            reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("endpoint '{}': invalid header name '{}'", self.name, name))?;
        }
        Ok(())
    }
}

impl RequestDelay {
    fn validate(&self) -> anyhow::Result<()> {
        match *self {
            RequestDelay::Fixed(secs) if !(secs >= 0.0 && secs <= MAX_SECONDS) => {
                bail!("request_delay must be in [0, {}] seconds", MAX_SECONDS)
            }
            RequestDelay::Uniform { min, max }
                if !(min >= 0.0 && min <= max && max <= MAX_SECONDS) =>
            {
                bail!("request_delay needs 0 <= min <= max <= {}", MAX_SECONDS)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
base_url: http://localhost:8000
num_workers: 4
requests_per_endpoint: 20
default_headers:
  Accept: application/json
report_title: ignored by the core
endpoints:
  - name: Get Item by ID
    path: /items/$random{1,100}
  - name: Search Items
    path: /items/search
    params:
      q: $random{cities}
  - name: Create Item
    method: POST
    path: /items
    data:
      name: $lorem{2}
datasets:
  cities: [London, Paris]
scenarios:
  smoke_test:
    description: Quick sanity check
    num_workers: 1
    requests_per_endpoint: 5
    num_test_runs: 1
    endpoints: ["Get Item by ID", "Search Items"]
"#;

    #[test]
    fn test_defaults() {
        let config = TestConfig::from_yaml(CONFIG).unwrap();
        assert_eq!(config.num_test_runs, 5);
        assert_eq!(config.timeout, 10.0);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_delay, 1.0);
        assert!(config.rate_limit.is_none());
        assert_eq!(config.endpoints[0].method, "GET");
        assert!(config.endpoints[0].json_content);
        config.validate().unwrap();
    }

    #[test]
    fn test_scenario_overlay() {
        let config = TestConfig::from_yaml(CONFIG).unwrap();
        let smoke = config.with_scenario("smoke_test").unwrap();
        assert_eq!(smoke.num_workers, 1);
        assert_eq!(smoke.requests_per_endpoint, 5);
        assert_eq!(smoke.num_test_runs, 1);
        let names: Vec<&str> = smoke.endpoints.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Get Item by ID", "Search Items"]);
        assert_eq!(smoke.total_requests(), 10);
    }

    #[test]
    fn test_unknown_scenario() {
        let config = TestConfig::from_yaml(CONFIG).unwrap();
        assert!(config.with_scenario("soak").is_err());
    }

    #[test]
    fn test_scenario_with_unknown_endpoint() {
        let mut config = TestConfig::from_yaml(CONFIG).unwrap();
        config.scenarios.insert(
            "broken".to_string(),
            ScenarioConfig {
                endpoints: Some(vec!["Delete Everything".to_string()]),
                ..Default::default()
            },
        );
        let err = config.with_scenario("broken").unwrap_err();
        assert!(err.to_string().contains("Delete Everything"));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_zero_workers() {
        let mut config = TestConfig::from_yaml(CONFIG).unwrap();
        config.num_workers = 0;
        assert!(config.validate().is_err());

        let mut config = TestConfig::from_yaml(CONFIG).unwrap();
        let dup = config.endpoints[0].clone();
        config.endpoints.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_durations() {
        let base = || TestConfig::from_yaml(CONFIG).unwrap();

        let mut config = base();
        config.rate_limit = Some(1.0e-30);
        assert!(config.validate().is_err());
        config.rate_limit = Some(20.0);
        config.validate().unwrap();

        let mut config = base();
        config.timeout = 1.0e20;
        assert!(config.validate().is_err());

        let mut config = base();
        config.retry_delay = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = base();
        config.request_delay = Some(RequestDelay::Uniform { min: 0.0, max: 1.0e300 });
        assert!(config.validate().is_err());

        let mut config = base();
        config.endpoints[0].timeout = Some(1.0e20);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_delay_forms() {
        let fixed: RequestDelay = serde_yaml::from_str("0.25").unwrap();
        assert_eq!(fixed, RequestDelay::Fixed(0.25));
        let uniform: RequestDelay = serde_yaml::from_str("{min: 0.1, max: 0.5}").unwrap();
        assert_eq!(uniform, RequestDelay::Uniform { min: 0.1, max: 0.5 });
        assert!(RequestDelay::Uniform { min: 1.0, max: 0.5 }.validate().is_err());
    }

    #[test]
    fn test_body_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("item.json"), r#"{"sku": "$uuid"}"#).unwrap();
        let yaml = r#"
base_url: http://localhost:8000
endpoints:
  - name: Create
    method: POST
    path: /items
    data: "@item.json"
"#;
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, yaml).unwrap();

        let config = TestConfig::from_file(&path).unwrap();
        assert_eq!(
            config.endpoints[0].data,
            Some(serde_json::json!({"sku": "$uuid"}))
        );
    }
}
