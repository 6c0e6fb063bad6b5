//! Error types for template compilation and value generation.

use thiserror::Error;

/// Problems found while loading generators or compiling templates.
///
/// These are always reported before any request is sent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed template token '{token}': {message}")]
    MalformedToken { token: String, message: String },

    #[error("undefined {kind} '{name}'")]
    UndefinedReference { kind: &'static str, name: String },

    #[error("invalid range '{name}': {message}")]
    InvalidRange { name: String, message: String },

    #[error("invalid generator '{name}': {message}")]
    InvalidGenerator { name: String, message: String },

    #[error("invalid expression '{expr}': {message}")]
    InvalidExpression { expr: String, message: String },

    /// Wraps another error with the place it was found (e.g. `body.user.id`).
    #[error("at {location}")]
    At {
        location: String,
        #[source]
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    pub(crate) fn malformed(token: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedToken {
            token: token.into(),
            message: message.into(),
        }
    }

    pub(crate) fn expression(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expr: expr.into(),
            message: message.into(),
        }
    }

    /// Attach a location to this error.
    pub fn at(self, location: impl Into<String>) -> Self {
        Self::At {
            location: location.into(),
            source: Box::new(self),
        }
    }
}

/// Failures while rendering a compiled template into a concrete value.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no candidates to choose from in {0}")]
    EmptyCandidates(String),

    #[error("division by zero in '{0}'")]
    DivisionByZero(String),

    #[error("'{0}' is not numeric")]
    NonNumeric(String),

    #[error("integer overflow in '{0}'")]
    Overflow(String),

    #[error("expression '{0}' produced a non-finite number")]
    InvalidNumber(String),
}
