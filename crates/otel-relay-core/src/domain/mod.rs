//! Domain module containing the configuration model, the ordered map, and the
//! match-pattern grammar.

pub mod configuration;
pub mod match_pattern;
pub mod ordered_map;

pub use configuration::{
    BackendConfiguration, Configuration, ContentConfiguration, ContentPatch, Instrumentation,
};
pub use match_pattern::{matches, validate_patterns, MatchPattern, MatchPatternError, PatternError};
pub use ordered_map::OrderedMap;
