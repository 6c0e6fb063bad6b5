//! Parsing and rendering of template strings.
//!
//! A template is a string with zero or more directives:
//!
//! | Directive | Produces |
//! |---|---|
//! | `$uuid` | random v4 UUID |
//! | `$now`, `$now{%Y-%m-%d}` | current UTC time |
//! | `$lorem{N}` | N lorem-ipsum words |
//! | `$random{1,10}`, `$random{0.5,2.0}` | uniform number |
//! | `$random{a,b,c}` | one of the literal candidates |
//! | `$random{name}` | a dataset entry, or a generator value |
//! | `$range{name}` | a value from a named range |
//! | `${expr}` | see [`crate::expr`] |
//!
//! `$$` writes a literal `$`. A `$` not followed by a letter, `_` or `{` is
//! kept as-is, so prices like `$5.00` need no escaping.

use crate::error::{ConfigError, GenerationError};
use crate::expr::Expr;
use crate::generator::{is_valid_strftime, pick};
use crate::number::Num;
use crate::registry::Registry;
use crate::value::value_to_text;
use chrono::Utc;
use rand::Rng;
use serde_json::Value;

const LOREM_WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "ut", "labore", "et", "dolore", "magna", "aliqua", "enim",
    "ad", "minim", "veniam", "quis", "nostrud", "exercitation", "ullamco", "laboris", "nisi",
    "aliquip", "ex", "ea", "commodo", "consequat", "duis", "aute", "irure", "in",
    "reprehenderit", "voluptate", "velit", "esse", "cillum", "eu", "fugiat", "nulla",
    "pariatur", "excepteur", "sint", "occaecat", "cupidatat", "non", "proident", "sunt", "culpa",
    "qui", "officia", "deserunt", "mollit", "anim", "id", "est", "laborum",
];

/// One parsed directive.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Uuid,
    Now { format: Option<String> },
    Lorem { words: usize },
    RandomInt { min: i64, max: i64 },
    RandomFloat { min: f64, max: f64 },
    RandomChoice(Vec<Value>),
    Dataset(String),
    Generator(String),
    Range(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Directive(Directive),
}

/// A compiled template string.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse `source` and resolve every reference against `registry`.
    pub fn compile(source: &str, registry: &Registry) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(idx) = rest.find('$') {
            literal.push_str(&rest[..idx]);
            let after = &rest[idx + 1..];

            match after.chars().next() {
                Some('$') => {
                    literal.push('$');
                    rest = &after[1..];
                }
                Some('{') => {
                    let end = after
                        .find('}')
                        .ok_or_else(|| ConfigError::malformed(&rest[idx..], "unterminated '${'"))?;
                    let expr = Expr::parse(&after[1..end])?;
                    expr.check(registry)?;
                    flush_literal(&mut literal, &mut segments);
                    segments.push(Segment::Directive(Directive::Expr(expr)));
                    rest = &after[end + 1..];
                }
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    let name_len = after
                        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                        .unwrap_or(after.len());
                    let name = &after[..name_len];
                    let tail = &after[name_len..];

                    let (args, consumed) = if tail.starts_with('{') {
                        let end = tail.find('}').ok_or_else(|| {
                            ConfigError::malformed(&rest[idx..], "unterminated '{'")
                        })?;
                        (Some(&tail[1..end]), end + 1)
                    } else {
                        (None, 0)
                    };

                    let token = &rest[idx..idx + 1 + name_len + consumed];
                    let directive = parse_directive(token, name, args, registry)?;
                    flush_literal(&mut literal, &mut segments);
                    segments.push(Segment::Directive(directive));
                    rest = &tail[consumed..];
                }
                _ => {
                    literal.push('$');
                    rest = after;
                }
            }
        }

        literal.push_str(rest);
        flush_literal(&mut literal, &mut segments);

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the template contains no directives.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Literal text with `$$` escapes already resolved; directives are skipped.
    pub(crate) fn render_literal(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Literal(text) => Some(text.as_str()),
                Segment::Directive(_) => None,
            })
            .collect()
    }

    /// The directives in order of appearance.
    pub fn directives(&self) -> impl Iterator<Item = &Directive> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Directive(d) => Some(d),
            Segment::Literal(_) => None,
        })
    }

    /// Render to a JSON value.
    ///
    /// A template that is exactly one directive keeps the directive's type
    /// (`"$random{1,5}"` renders a number); anything else renders a string.
    pub fn render<R: Rng + ?Sized>(
        &self,
        registry: &Registry,
        rng: &mut R,
    ) -> Result<Value, GenerationError> {
        match self.segments.as_slice() {
            [Segment::Directive(directive)] => directive.render(registry, rng),
            _ => self.render_string(registry, rng).map(Value::String),
        }
    }

    /// Render with every directive interpolated as text.
    pub fn render_string<R: Rng + ?Sized>(
        &self,
        registry: &Registry,
        rng: &mut R,
    ) -> Result<String, GenerationError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Directive(directive) => {
                    out.push_str(&value_to_text(&directive.render(registry, rng)?))
                }
            }
        }
        Ok(out)
    }
}

impl Directive {
    /// Generate one fresh value.
    pub fn render<R: Rng + ?Sized>(
        &self,
        registry: &Registry,
        rng: &mut R,
    ) -> Result<Value, GenerationError> {
        match self {
            Directive::Uuid => Ok(Value::String(
                uuid::Builder::from_random_bytes(rng.gen())
                    .into_uuid()
                    .to_string(),
            )),
            Directive::Now { format } => {
                let now = Utc::now();
                Ok(Value::String(
                    match format.as_deref().or_else(|| registry.now_format()) {
                        Some(fmt) => now.format(fmt).to_string(),
                        None => now.to_rfc3339(),
                    },
                ))
            }
            Directive::Lorem { words } => Ok(Value::String(
                (0..*words)
                    .map(|_| LOREM_WORDS[rng.gen_range(0..LOREM_WORDS.len())])
                    .collect::<Vec<_>>()
                    .join(" "),
            )),
            Directive::RandomInt { min, max } => Ok(Value::from(rng.gen_range(*min..=*max))),
            Directive::RandomFloat { min, max } => {
                let v = if min == max {
                    *min
                } else {
                    rng.gen_range(*min..=*max)
                };
                Num::Float(v)
                    .to_value()
                    .ok_or_else(|| GenerationError::InvalidNumber(format!("$random{{{},{}}}", min, max)))
            }
            Directive::RandomChoice(candidates) => pick(candidates, rng)
                .cloned()
                .ok_or_else(|| GenerationError::EmptyCandidates("$random".to_string())),
            Directive::Dataset(name) => registry
                .dataset(name)
                .and_then(|values| pick(values, rng))
                .cloned()
                .ok_or_else(|| GenerationError::EmptyCandidates(format!("dataset '{}'", name))),
            Directive::Generator(name) => match registry.generator(name) {
                Some(generator) => generator.generate(name, rng),
                None => Err(GenerationError::EmptyCandidates(format!(
                    "generator '{}'",
                    name
                ))),
            },
            Directive::Range(name) => match registry.range(name) {
                Some(range) => range
                    .sample(rng)
                    .to_value()
                    .ok_or_else(|| GenerationError::InvalidNumber(format!("$range{{{}}}", name))),
                None => Err(GenerationError::EmptyCandidates(format!("range '{}'", name))),
            },
            Directive::Expr(expr) => expr.evaluate(registry, rng),
        }
    }
}

fn flush_literal(literal: &mut String, segments: &mut Vec<Segment>) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(literal)));
    }
}

fn parse_directive(
    token: &str,
    name: &str,
    args: Option<&str>,
    registry: &Registry,
) -> Result<Directive, ConfigError> {
    let required = || {
        args.ok_or_else(|| ConfigError::malformed(token, format!("${} requires {{...}}", name)))
    };

    match name {
        "uuid" => match args {
            None => Ok(Directive::Uuid),
            Some(_) => Err(ConfigError::malformed(token, "$uuid takes no arguments")),
        },
        "now" => {
            let format = args.map(str::trim).filter(|f| !f.is_empty());
            if let Some(fmt) = format {
                if !is_valid_strftime(fmt) {
                    return Err(ConfigError::malformed(token, "invalid strftime format"));
                }
            }
            Ok(Directive::Now {
                format: format.map(str::to_string),
            })
        }
        "lorem" => {
            let count = required()?.trim();
            count
                .parse::<usize>()
                .map(|words| Directive::Lorem { words })
                .map_err(|_| {
                    ConfigError::malformed(token, format!("word count '{}' is not an integer", count))
                })
        }
        "random" => parse_random(token, required()?, registry),
        "range" => {
            let range = required()?.trim();
            if registry.range(range).is_none() {
                return Err(ConfigError::UndefinedReference {
                    kind: "range",
                    name: range.to_string(),
                });
            }
            Ok(Directive::Range(range.to_string()))
        }
        other => Err(ConfigError::malformed(
            token,
            format!("unknown directive '${}'", other),
        )),
    }
}

fn parse_random(token: &str, args: &str, registry: &Registry) -> Result<Directive, ConfigError> {
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(ConfigError::malformed(token, "empty candidate"));
    }

    match parts.as_slice() {
        [name] if is_identifier(name) => {
            // Datasets win over generators with the same name
            if registry.dataset(name).is_some() {
                Ok(Directive::Dataset(name.to_string()))
            } else if registry.generator(name).is_some() {
                Ok(Directive::Generator(name.to_string()))
            } else {
                Err(ConfigError::UndefinedReference {
                    kind: "dataset or generator",
                    name: name.to_string(),
                })
            }
        }
        [a, b] => match (Num::parse_literal(a), Num::parse_literal(b)) {
            (Some(min), Some(max)) => {
                if min.as_f64() > max.as_f64() {
                    return Err(ConfigError::malformed(token, "min is greater than max"));
                }
                if !(max.as_f64() - min.as_f64()).is_finite() {
                    return Err(ConfigError::malformed(token, "bounds are too far apart"));
                }
                Ok(match (min, max) {
                    (Num::Int(min), Num::Int(max)) => Directive::RandomInt { min, max },
                    (min, max) => Directive::RandomFloat {
                        min: min.as_f64(),
                        max: max.as_f64(),
                    },
                })
            }
            _ => Ok(literal_choice(&parts)),
        },
        _ => Ok(literal_choice(&parts)),
    }
}

fn literal_choice(parts: &[&str]) -> Directive {
    Directive::RandomChoice(parts.iter().map(|p| infer_scalar(p)).collect())
}

/// `true`/`false` become booleans, numeric literals numbers, anything else a string.
fn infer_scalar(s: &str) -> Value {
    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Num::parse_literal(s)
            .and_then(Num::to_value)
            .unwrap_or_else(|| Value::String(s.to_string())),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && s != "true"
        && s != "false"
}
