//! Text utilities.

pub mod key_value;

pub use key_value::{parse_key_values, KeyValueParser, ParseOutcome, RemainderPolicy};
