//! Read-only lookup tables shared by every template and worker.

use crate::error::ConfigError;
use crate::generator::{is_valid_strftime, GeneratorSpec};
use crate::range::RangeSpec;
use serde_json::Value;
use std::collections::HashMap;

/// Named generators, datasets, ranges and variables.
///
/// Built once from configuration and never mutated afterwards, so it can be
/// shared across workers behind an `Arc` without locking.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    generators: HashMap<String, GeneratorSpec>,
    datasets: HashMap<String, Vec<Value>>,
    ranges: HashMap<String, RangeSpec>,
    variables: HashMap<String, Value>,
    now_format: Option<String>,
}

impl Registry {
    /// Build a registry, validating every generator and range.
    pub fn new(
        generators: HashMap<String, GeneratorSpec>,
        datasets: HashMap<String, Vec<Value>>,
        ranges: HashMap<String, RangeSpec>,
        variables: HashMap<String, Value>,
    ) -> Result<Self, ConfigError> {
        for (name, generator) in &generators {
            generator.validate(name)?;
        }
        for (name, range) in &ranges {
            range.validate(name)?;
        }

        Ok(Self {
            generators,
            datasets,
            ranges,
            variables,
            now_format: None,
        })
    }

    /// Default strftime format for `$now` (RFC 3339 when unset).
    pub fn with_now_format(mut self, format: Option<String>) -> Result<Self, ConfigError> {
        if let Some(fmt) = &format {
            if !is_valid_strftime(fmt) {
                return Err(ConfigError::malformed(fmt, "invalid strftime format for $now"));
            }
        }
        self.now_format = format;
        Ok(self)
    }

    pub fn generator(&self, name: &str) -> Option<&GeneratorSpec> {
        self.generators.get(name)
    }

    pub fn dataset(&self, name: &str) -> Option<&[Value]> {
        self.datasets.get(name).map(Vec::as_slice)
    }

    pub fn range(&self, name: &str) -> Option<&RangeSpec> {
        self.ranges.get(name)
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn now_format(&self) -> Option<&str> {
        self.now_format.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number::Num;

    #[test]
    fn test_new_rejects_invalid_range() {
        let mut ranges = HashMap::new();
        ranges.insert(
            "bad".to_string(),
            RangeSpec::new(Num::Int(10), Num::Int(1), None),
        );
        let err = Registry::new(HashMap::new(), HashMap::new(), ranges, HashMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_new_rejects_invalid_generator() {
        let mut generators = HashMap::new();
        generators.insert(
            "empty".to_string(),
            GeneratorSpec::Choice { values: vec![] },
        );
        assert!(Registry::new(generators, HashMap::new(), HashMap::new(), HashMap::new()).is_err());
    }
}
