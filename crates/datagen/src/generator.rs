//! Named, typed generators referenced from templates via `$random{name}`.

use crate::error::{ConfigError, GenerationError};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A generator rule loaded from configuration.
///
/// The `type` tag selects exactly one algorithm; an unknown tag fails
/// deserialization, so it is caught when the configuration is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneratorSpec {
    /// Uniform pick from a list of values.
    Choice { values: Vec<Value> },
    /// Uniform integer in `[min, max]`.
    Randint { min: i64, max: i64 },
    /// Random characters, alphanumeric unless a charset is given.
    #[serde(rename = "string")]
    Text {
        #[serde(default = "default_string_length")]
        length: usize,
        #[serde(default)]
        charset: Option<String>,
        #[serde(default)]
        prefix: Option<String>,
    },
    Email {
        #[serde(default = "default_email_domains")]
        domains: Vec<String>,
    },
    Boolean {
        #[serde(default = "default_probability")]
        probability: f64,
    },
    /// Uniform instant between `start` and `end` (default: the last 30 days).
    Timestamp {
        #[serde(default)]
        start: Option<DateTime<Utc>>,
        #[serde(default)]
        end: Option<DateTime<Utc>>,
        #[serde(default)]
        format: Option<String>,
    },
    /// Pick proportional to the declared weights.
    WeightedChoice { choices: Vec<WeightedValue> },
}

/// One candidate of a `weighted_choice` generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedValue {
    pub value: Value,
    pub weight: f64,
}

fn default_string_length() -> usize {
    10
}

fn default_email_domains() -> Vec<String> {
    vec!["example.com".to_string()]
}

fn default_probability() -> f64 {
    0.5
}

const EMAIL_LOCAL_LEN: usize = 10;
const DEFAULT_TIMESTAMP_WINDOW_DAYS: i64 = 30;

impl GeneratorSpec {
    /// Name of the `type` tag, used in log and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            GeneratorSpec::Choice { .. } => "choice",
            GeneratorSpec::Randint { .. } => "randint",
            GeneratorSpec::Text { .. } => "string",
            GeneratorSpec::Email { .. } => "email",
            GeneratorSpec::Boolean { .. } => "boolean",
            GeneratorSpec::Timestamp { .. } => "timestamp",
            GeneratorSpec::WeightedChoice { .. } => "weighted_choice",
        }
    }

    /// Load-time checks on the generator parameters.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidGenerator {
            name: name.to_string(),
            message,
        };

        match self {
            GeneratorSpec::Choice { values } if values.is_empty() => {
                Err(invalid("choice needs at least one value".into()))
            }
            GeneratorSpec::Randint { min, max } if min > max => Err(invalid(format!(
                "min ({}) is greater than max ({})",
                min, max
            ))),
            GeneratorSpec::Text {
                charset: Some(charset),
                ..
            } if charset.is_empty() => Err(invalid("charset must not be empty".into())),
            GeneratorSpec::Email { domains } if domains.is_empty() => {
                Err(invalid("email needs at least one domain".into()))
            }
            GeneratorSpec::Boolean { probability } if !(0.0..=1.0).contains(probability) => Err(
                invalid(format!("probability must be in [0, 1], got {}", probability)),
            ),
            GeneratorSpec::Timestamp {
                start: Some(start),
                end: Some(end),
                ..
            } if start > end => Err(invalid("start is after end".into())),
            GeneratorSpec::Timestamp {
                format: Some(format),
                ..
            } if !is_valid_strftime(format) => {
                Err(invalid(format!("invalid timestamp format '{}'", format)))
            }
            GeneratorSpec::WeightedChoice { choices } => {
                if choices.is_empty() {
                    return Err(invalid("weighted_choice needs at least one choice".into()));
                }
                if choices
                    .iter()
                    .any(|c| !c.weight.is_finite() || c.weight < 0.0)
                {
                    return Err(invalid("weights must be finite and non-negative".into()));
                }
                if choices.iter().map(|c| c.weight).sum::<f64>() <= 0.0 {
                    return Err(invalid("weights must not all be zero".into()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Produce one value.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        name: &str,
        rng: &mut R,
    ) -> Result<Value, GenerationError> {
        match self {
            GeneratorSpec::Choice { values } => pick(values, rng)
                .cloned()
                .ok_or_else(|| GenerationError::EmptyCandidates(format!("generator '{}'", name))),
            GeneratorSpec::Randint { min, max } => Ok(Value::from(rng.gen_range(*min..=*max))),
            GeneratorSpec::Text {
                length,
                charset,
                prefix,
            } => {
                let mut out = prefix.clone().unwrap_or_default();
                match charset {
                    Some(charset) => {
                        let chars: Vec<char> = charset.chars().collect();
                        if chars.is_empty() {
                            return Err(GenerationError::EmptyCandidates(format!(
                                "charset of generator '{}'",
                                name
                            )));
                        }
                        for _ in 0..*length {
                            out.push(chars[rng.gen_range(0..chars.len())]);
                        }
                    }
                    None => {
                        out.extend((0..*length).map(|_| rng.sample(Alphanumeric) as char));
                    }
                }
                Ok(Value::String(out))
            }
            GeneratorSpec::Email { domains } => {
                let domain = pick(domains, rng).ok_or_else(|| {
                    GenerationError::EmptyCandidates(format!("domains of generator '{}'", name))
                })?;
                let local: String = (0..EMAIL_LOCAL_LEN)
                    .map(|_| rng.sample(Alphanumeric) as char)
                    .collect::<String>()
                    .to_lowercase();
                Ok(Value::String(format!("{}@{}", local, domain)))
            }
            GeneratorSpec::Boolean { probability } => {
                Ok(Value::Bool(rng.gen_bool(probability.clamp(0.0, 1.0))))
            }
            GeneratorSpec::Timestamp { start, end, format } => {
                let end = end.unwrap_or_else(Utc::now);
                let start =
                    start.unwrap_or_else(|| end - Duration::days(DEFAULT_TIMESTAMP_WINDOW_DAYS));
                let (lo, hi) = (start.timestamp(), end.timestamp().max(start.timestamp()));
                let secs = rng.gen_range(lo..=hi);
                let instant = Utc.timestamp_opt(secs, 0).single().unwrap_or(start);
                Ok(Value::String(match format {
                    Some(fmt) => instant.format(fmt).to_string(),
                    None => instant.to_rfc3339(),
                }))
            }
            GeneratorSpec::WeightedChoice { choices } => weighted_pick(choices, rng)
                .map(|c| c.value.clone())
                .ok_or_else(|| GenerationError::EmptyCandidates(format!("generator '{}'", name))),
        }
    }
}

/// True when chrono can render `format` without hitting an unknown specifier.
pub(crate) fn is_valid_strftime(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

pub(crate) fn pick<'a, T, R: Rng + ?Sized>(items: &'a [T], rng: &mut R) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        Some(&items[rng.gen_range(0..items.len())])
    }
}

/// Cumulative-weight sampling.
fn weighted_pick<'a, R: Rng + ?Sized>(
    choices: &'a [WeightedValue],
    rng: &mut R,
) -> Option<&'a WeightedValue> {
    let total: f64 = choices.iter().map(|c| c.weight).sum();
    if choices.is_empty() || total <= 0.0 {
        return None;
    }

    let r = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for choice in choices {
        cumulative += choice.weight;
        if r < cumulative {
            return Some(choice);
        }
    }

    // Rounding can leave r just above the last cumulative sum
    choices.iter().rev().find(|c| c.weight > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_unknown_type_fails_to_deserialize() {
        let result: Result<GeneratorSpec, _> = serde_json::from_value(json!({"type": "phone"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_randint_within_bounds() {
        let gen = GeneratorSpec::Randint { min: -3, max: 3 };
        let mut rng = rng();
        for _ in 0..500 {
            let v = gen.generate("n", &mut rng).unwrap().as_i64().unwrap();
            assert!((-3..=3).contains(&v));
        }
    }

    #[test]
    fn test_string_with_prefix_and_charset() {
        let gen: GeneratorSpec = serde_json::from_value(
            json!({"type": "string", "length": 6, "charset": "ab", "prefix": "sku-"}),
        )
        .unwrap();
        let v = gen.generate("sku", &mut rng()).unwrap();
        let s = v.as_str().unwrap();
        assert!(s.starts_with("sku-"));
        assert_eq!(s.len(), 10);
        assert!(s[4..].chars().all(|c| c == 'a' || c == 'b'));
    }

    #[test]
    fn test_email_uses_configured_domain() {
        let gen = GeneratorSpec::Email {
            domains: vec!["test.io".to_string()],
        };
        let v = gen.generate("email", &mut rng()).unwrap();
        let s = v.as_str().unwrap();
        assert!(s.ends_with("@test.io"));
        assert_eq!(s.split('@').next().unwrap().len(), EMAIL_LOCAL_LEN);
    }

    #[test]
    fn test_timestamp_within_window() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let gen = GeneratorSpec::Timestamp {
            start: Some(start),
            end: Some(end),
            format: None,
        };
        let v = gen.generate("ts", &mut rng()).unwrap();
        let parsed = DateTime::parse_from_rfc3339(v.as_str().unwrap()).unwrap();
        assert!(parsed >= start && parsed <= end);
    }

    #[test]
    fn test_weighted_choice_respects_zero_weight() {
        let gen = GeneratorSpec::WeightedChoice {
            choices: vec![
                WeightedValue {
                    value: json!("never"),
                    weight: 0.0,
                },
                WeightedValue {
                    value: json!("always"),
                    weight: 1.0,
                },
            ],
        };
        let mut rng = rng();
        for _ in 0..200 {
            assert_eq!(gen.generate("w", &mut rng).unwrap(), json!("always"));
        }
    }

    #[test]
    fn test_weighted_choice_is_proportional() {
        let gen = GeneratorSpec::WeightedChoice {
            choices: vec![
                WeightedValue {
                    value: json!("a"),
                    weight: 9.0,
                },
                WeightedValue {
                    value: json!("b"),
                    weight: 1.0,
                },
            ],
        };
        let mut rng = rng();
        let a = (0..10_000)
            .filter(|_| gen.generate("w", &mut rng).unwrap() == json!("a"))
            .count();
        assert!((8_500..=9_500).contains(&a), "got {} draws of 'a'", a);
    }

    #[test]
    fn test_validate_catches_bad_parameters() {
        assert!(GeneratorSpec::Choice { values: vec![] }.validate("c").is_err());
        assert!(GeneratorSpec::Randint { min: 2, max: 1 }.validate("r").is_err());
        assert!(GeneratorSpec::Boolean { probability: 1.5 }.validate("b").is_err());
        assert!(GeneratorSpec::WeightedChoice {
            choices: vec![WeightedValue {
                value: json!(1),
                weight: 0.0
            }]
        }
        .validate("w")
        .is_err());
        assert!(GeneratorSpec::Randint { min: 1, max: 1 }.validate("r").is_ok());
        assert!(GeneratorSpec::Timestamp {
            start: None,
            end: None,
            format: Some("%Y-%Q".to_string())
        }
        .validate("t")
        .is_err());
    }
}
