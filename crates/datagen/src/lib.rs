//! Dynamic test data generation for API load tests.
//!
//! Request templates carry small directives (`$uuid`, `$random{1,10}`,
//! `$range{price}`, `${price.min / 100}`, ...) that are parsed once into a
//! typed AST when the configuration is loaded and then rendered into fresh
//! values for every request:
//! - [`Registry`] holds the named generators, datasets, ranges and variables
//! - [`Template`] is one parsed string with literal and directive segments
//! - [`TemplateValue`] is a whole JSON tree of templates (request bodies)
//!
//! Parsing and reference checks report [`ConfigError`]; rendering can only
//! fail with a [`GenerationError`].

pub mod error;
pub mod expr;
pub mod generator;
pub mod number;
pub mod range;
pub mod registry;
pub mod template;
pub mod value;

pub use error::{ConfigError, GenerationError};
pub use expr::Expr;
pub use generator::{GeneratorSpec, WeightedValue};
pub use number::Num;
pub use range::RangeSpec;
pub use registry::Registry;
pub use template::{Directive, Template};
pub use value::{value_to_text, TemplateValue};
