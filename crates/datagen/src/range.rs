//! Named numeric intervals referenced by `$range{name}` and `${name.min}`.

use crate::error::ConfigError;
use crate::number::Num;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A numeric interval `[min, max]` with an optional step.
///
/// The range is integer-typed when every bound is written as an integer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub min: Num,
    pub max: Num,
    #[serde(default)]
    pub step: Option<Num>,
}

impl RangeSpec {
    pub fn new(min: Num, max: Num, step: Option<Num>) -> Self {
        Self { min, max, step }
    }

    /// Check `min <= max`, a finite span and `step > 0`.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if !(self.max.as_f64() - self.min.as_f64()).is_finite() {
            return Err(ConfigError::InvalidRange {
                name: name.to_string(),
                message: format!("span from {} to {} is not finite", self.min, self.max),
            });
        }
        if self.min.as_f64() > self.max.as_f64() {
            return Err(ConfigError::InvalidRange {
                name: name.to_string(),
                message: format!("min ({}) is greater than max ({})", self.min, self.max),
            });
        }
        if let Some(step) = self.step {
            if !(step.as_f64() > 0.0) {
                return Err(ConfigError::InvalidRange {
                    name: name.to_string(),
                    message: format!("step must be positive, got {}", step),
                });
            }
        }
        Ok(())
    }

    pub fn is_integral(&self) -> bool {
        self.min.is_int() && self.max.is_int() && self.step.map_or(true, Num::is_int)
    }

    /// Draw one value, honoring `min + k * step <= max`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Num {
        match (self.min, self.max, self.step) {
            (Num::Int(min), Num::Int(max), Some(Num::Int(step))) => {
                let steps = (max as i128 - min as i128) / step as i128;
                let k = rng.gen_range(0..=steps);
                Num::Int((min as i128 + k * step as i128) as i64)
            }
            (Num::Int(min), Num::Int(max), None) => Num::Int(rng.gen_range(min..=max)),
            _ => {
                let (lo, hi) = (self.min.as_f64(), self.max.as_f64());
                match self.step {
                    Some(step) => {
                        let step = step.as_f64();
                        let steps = ((hi - lo) / step + 1e-9).floor() as u64;
                        let k = rng.gen_range(0..=steps);
                        Num::Float((lo + k as f64 * step).min(hi))
                    }
                    None if lo == hi => Num::Float(lo),
                    None => Num::Float(rng.gen_range(lo..=hi)),
                }
            }
        }
    }

    /// Attribute access used by expressions (`price.min`).
    pub fn attribute(&self, attr: &str) -> Option<Num> {
        match attr {
            "min" => Some(self.min),
            "max" => Some(self.max),
            "step" => self.step,
            _ => None,
        }
    }
}
