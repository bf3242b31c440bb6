//! Random string generation driven by composable rules.
//!
//! Provides:
//! - [`StringGenerator`]: fixed-length strings drawn without modulo bias from
//!   the union of every rule's charset
//! - [`CharsetRule`]: the standard rule, requiring a minimum count of runes
//!   from a charset
//! - [`Registry`]: rule kind to constructor mapping used by the parsers
//! - HCL policy parsing and JSON (de)serialization
//! - base62 encoding and random base62 strings

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod base62;
pub mod error;
pub mod generator;
pub mod parser;
pub mod registry;
pub mod rules;
mod serializing;

pub use error::{PolicyError, PolicyResult};
pub use generator::{StringGenerator, DEFAULT_TIMEOUT, MIN_LENGTH};
pub use parser::{parse_policy, PolicyParser};
pub use registry::Registry;
pub use rules::{CharsetRule, Rule};
