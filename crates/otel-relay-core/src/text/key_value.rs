//! Quoted key-value parser for user-typed header and attribute strings.
//!
//! # Syntax
//!
//! ```text
//! authorization:Bearer abc, "x-with:colon":'value, with comma', note:it\'s
//! ```
//!
//! - Pairs are separated by a single delimiter character (`,` by default).
//! - Key and value are separated by the first unquoted `:`.
//! - A key may be wrapped in `'` or `"` if the quote is its first character.
//!   A value may be wrapped if the quote comes right after the colon.
//! - Inside a quoted region the closing quote can be written twice to get a
//!   literal quote (`'it''s'`).
//! - A backslash escapes the next character anywhere.
//! - Keys are trimmed, values are kept as typed.
//!
//! The parser never fails. Whatever could not be turned into a pair is
//! returned as the remainder, see [`RemainderPolicy`].

use crate::domain::ordered_map::OrderedMap;

/// How the unparsed tail of the input is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemainderPolicy {
    /// The raw text typed since the last committed pair.
    ///
    /// Suited to incremental input: feeding `remainder` back in front of the
    /// next keystrokes continues where the user left off.
    #[default]
    LastRemains,

    /// The in-progress key or unterminated quoted value, re-prefixed with its
    /// opening quote, with escapes already resolved.
    FinalRemainder,
}

/// Result of a parse: the committed pairs plus whatever was left over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub map: OrderedMap,
    pub remainder: String,
}

/// Parses `input` with the default delimiter and policy.
pub fn parse_key_values(input: &str) -> ParseOutcome {
    KeyValueParser::default().parse(input)
}

/// A configured parser. Cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyValueParser {
    delimiter: char,
    policy: RemainderPolicy,
}

impl Default for KeyValueParser {
    fn default() -> Self {
        Self {
            delimiter: ',',
            policy: RemainderPolicy::LastRemains,
        }
    }
}

impl KeyValueParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_policy(mut self, policy: RemainderPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn parse(&self, input: &str) -> ParseOutcome {
        let mut scanner = Scanner::default();
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            scanner.raw.push(c);

            if scanner.escape_next {
                scanner.escape_next = false;
                scanner.after_colon = false;
                scanner.active().push(c);
                continue;
            }
            if c == '\\' {
                scanner.escape_next = true;
                scanner.after_colon = false;
                continue;
            }

            // Shared by both fields: inside quotes only the opening quote
            // character is special.
            if let Some(q) = scanner.inside_quotes {
                if c == q {
                    if chars.peek() == Some(&q) {
                        chars.next();
                        scanner.raw.push(q);
                        scanner.active().push(q);
                    } else {
                        scanner.inside_quotes = None;
                    }
                } else {
                    scanner.active().push(c);
                }
                continue;
            }

            match scanner.field {
                Field::Key => {
                    if c == ':' {
                        scanner.field = Field::Value;
                        scanner.after_colon = true;
                        scanner.opened_quote = None;
                    } else if is_quote(c) && scanner.key.trim().is_empty() {
                        // Leading blanks before a quoted key are dropped.
                        scanner.key.clear();
                        scanner.inside_quotes = Some(c);
                        scanner.opened_quote = Some(c);
                    } else {
                        scanner.key.push(c);
                    }
                }
                Field::Value => {
                    let first = std::mem::take(&mut scanner.after_colon);
                    if first && is_quote(c) {
                        scanner.inside_quotes = Some(c);
                        scanner.opened_quote = Some(c);
                    } else if c == self.delimiter {
                        scanner.commit();
                    } else {
                        scanner.value.push(c);
                    }
                }
            }
        }

        scanner.finish(self.policy)
    }
}

fn is_quote(c: char) -> bool {
    c == '"' || c == '\''
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Field {
    #[default]
    Key,
    Value,
}

#[derive(Debug, Default)]
struct Scanner {
    map: OrderedMap,
    field: Field,
    key: String,
    value: String,
    inside_quotes: Option<char>,
    /// Quote that opened the current field, kept for the final remainder.
    opened_quote: Option<char>,
    after_colon: bool,
    escape_next: bool,
    /// Raw input since the last commit.
    raw: String,
}

impl Scanner {
    fn active(&mut self) -> &mut String {
        match self.field {
            Field::Key => &mut self.key,
            Field::Value => &mut self.value,
        }
    }

    fn commit(&mut self) {
        let key = self.key.trim();
        if !key.is_empty() {
            self.map.insert(key, std::mem::take(&mut self.value));
        }
        self.key.clear();
        self.value.clear();
        self.raw.clear();
        self.field = Field::Key;
        self.inside_quotes = None;
        self.opened_quote = None;
        self.after_colon = false;
    }

    fn finish(mut self, policy: RemainderPolicy) -> ParseOutcome {
        if self.field == Field::Value && self.inside_quotes.is_none() {
            self.commit();
        }

        let nothing_pending = self.field == Field::Key
            && self.inside_quotes.is_none()
            && self.key.trim().is_empty();

        let remainder = if nothing_pending {
            String::new()
        } else {
            match policy {
                RemainderPolicy::LastRemains => self.raw,
                RemainderPolicy::FinalRemainder => {
                    let mut out = String::new();
                    match self.field {
                        Field::Key => {
                            out.extend(self.inside_quotes);
                            out.push_str(&self.key);
                        }
                        Field::Value => {
                            out.push_str(&self.key);
                            out.push(':');
                            out.extend(self.opened_quote);
                            out.push_str(&self.value);
                        }
                    }
                    out
                }
            }
        };

        ParseOutcome {
            map: self.map,
            remainder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(outcome: &ParseOutcome) -> Vec<(&str, &str)> {
        outcome.map.iter().collect()
    }

    #[test]
    fn test_empty_input() {
        let out = parse_key_values("");
        assert!(out.map.is_empty());
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn test_single_pair() {
        let out = parse_key_values("key:value");
        assert_eq!(entries(&out), vec![("key", "value")]);
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn test_double_quoted_value_with_single_quote_inside() {
        let out = parse_key_values(r#"key:"value's""#);
        assert_eq!(entries(&out), vec![("key", "value's")]);
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn test_unterminated_quote_is_left_as_remainder() {
        let out = parse_key_values(r#"key:"value's"#);
        assert!(out.map.is_empty());
        assert_eq!(out.remainder, r#"key:"value's"#);
    }

    #[test]
    fn test_escaped_quotes_are_literal() {
        let out = parse_key_values(
            r#"unquoted-example:abc\"def,   example-key:"not-necessarily-\"quoted\"-value""#,
        );

        assert_eq!(
            entries(&out),
            vec![
                ("unquoted-example", r#"abc"def"#),
                ("example-key", r#"not-necessarily-"quoted"-value"#),
            ]
        );
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn test_bare_quote_is_the_remainder() {
        assert_eq!(parse_key_values("\"").remainder, "\"");
        let final_policy = KeyValueParser::new().with_policy(RemainderPolicy::FinalRemainder);
        assert_eq!(final_policy.parse("'").remainder, "'");
    }

    #[test]
    fn test_balanced_input_leaves_no_remainder() {
        let out = parse_key_values(r#"a:1, "b c":'d,e', f:"g:h""#);

        assert_eq!(entries(&out), vec![("a", "1"), ("b c", "d,e"), ("f", "g:h")]);
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn test_quoted_key_may_contain_colon() {
        let out = parse_key_values(r#""x:y":z"#);
        assert_eq!(entries(&out), vec![("x:y", "z")]);
    }

    #[test]
    fn test_doubled_quote_folds_to_one() {
        let out = parse_key_values("k:'it''s'");
        assert_eq!(entries(&out), vec![("k", "it's")]);
    }

    #[test]
    fn test_quote_not_right_after_colon_is_literal() {
        let out = parse_key_values(r#"k: "v""#);
        assert_eq!(entries(&out), vec![("k", r#" "v""#)]);
    }

    #[test]
    fn test_other_quote_kind_inside_quoted_key_is_stored() {
        let out = parse_key_values(r#""it's":yes"#);
        assert_eq!(entries(&out), vec![("it's", "yes")]);
    }

    #[test]
    fn test_custom_delimiter() {
        let out = KeyValueParser::new().with_delimiter(';').parse("a:1,2;b:3");
        assert_eq!(entries(&out), vec![("a", "1,2"), ("b", "3")]);
    }

    #[test]
    fn test_repeated_key_keeps_first_position() {
        let out = parse_key_values("a:1,b:2,a:3");
        assert_eq!(entries(&out), vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_last_remains_tracks_raw_tail_since_commit() {
        let out = parse_key_values(r"a:b,c\:d");
        assert_eq!(entries(&out), vec![("a", "b")]);
        assert_eq!(out.remainder, r"c\:d");
    }

    #[test]
    fn test_final_remainder_reports_resolved_key() {
        let parser = KeyValueParser::new().with_policy(RemainderPolicy::FinalRemainder);

        let out = parser.parse(r"a:b,c\:d");

        assert_eq!(entries(&out), vec![("a", "b")]);
        assert_eq!(out.remainder, "c:d");
    }

    #[test]
    fn test_final_remainder_reprefixes_open_quote() {
        let parser = KeyValueParser::new().with_policy(RemainderPolicy::FinalRemainder);

        assert_eq!(parser.parse(r#"a:b,"partial"#).remainder, r#""partial"#);
        assert_eq!(parser.parse("a:'unterminated").remainder, "a:'unterminated");
    }

    #[test]
    fn test_final_remainder_commits_value_without_trailing_delimiter() {
        let parser = KeyValueParser::new().with_policy(RemainderPolicy::FinalRemainder);

        let out = parser.parse("a:1,b:2");

        assert_eq!(entries(&out), vec![("a", "1"), ("b", "2")]);
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn test_trailing_delimiter_and_whitespace_leave_no_remainder() {
        let out = parse_key_values("a:1, ");
        assert_eq!(entries(&out), vec![("a", "1")]);
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn test_empty_key_is_not_committed() {
        let out = parse_key_values(":orphan,k:v");
        assert_eq!(entries(&out), vec![("k", "v")]);
    }
}
