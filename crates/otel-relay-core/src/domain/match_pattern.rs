//! URL match patterns deciding which pages may talk to the background.
//!
//! # Grammar
//!
//! ```text
//! <pattern> := "<all_urls>" | <scheme> "://" <host> <path>
//! <scheme>  := "*" | "http" | "https" | "ws" | "wss" | "ftp" | "file"
//! <host>    := "*" | "*." <literal> | <literal>      (optionally ":" <port> | ":*")
//! <path>    := "/" <any chars, "*" matches any sequence>
//! ```
//!
//! `*` as scheme matches `http`, `https`, `ws` and `wss`. A host without a port
//! matches any port. `file` patterns may have an empty host (`file:///tmp/*`).
//! The path wildcard is matched against the URL's path plus query.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pattern matching every URL with a supported scheme.
pub const ALL_URLS: &str = "<all_urls>";

const WILDCARD_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];
const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "ws", "wss", "ftp", "file"];

/// Why a pattern string does not follow the grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,

    #[error("missing scheme separator \"://\"")]
    MissingSchemeSeparator,

    #[error("invalid scheme {0:?}")]
    InvalidScheme(String),

    #[error("missing host")]
    MissingHost,

    #[error("invalid host {0:?}: '*' may only appear alone or as a leading \"*.\"")]
    InvalidHost(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("missing path; the pattern must contain a '/' after the host")]
    MissingPath,

    #[error("path could not be compiled: {0}")]
    InvalidPath(String),
}

/// A pattern paired with the reason it was rejected, kept for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPatternError {
    pub pattern: String,
    pub error: String,
}

impl MatchPatternError {
    pub fn new(pattern: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            pattern: pattern.into(),
            error: error.to_string(),
        }
    }
}

// ── Parsed pattern ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum SchemePattern {
    AnyWeb,
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Any,
    /// `*.example.com`: the domain itself and every subdomain.
    Suffix(String),
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PortPattern {
    Any,
    Exact(u16),
}

#[derive(Debug, Clone)]
enum Kind {
    AllUrls,
    Url {
        scheme: SchemePattern,
        host: HostPattern,
        port: PortPattern,
        path: Regex,
    },
}

/// A parsed, syntactically valid match pattern.
#[derive(Debug, Clone)]
pub struct MatchPattern {
    source: String,
    kind: Kind,
}

impl MatchPattern {
    /// Parses `pattern` against the grammar described in the module docs.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let source = pattern.to_string();
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }
        if pattern == ALL_URLS {
            return Ok(Self {
                source,
                kind: Kind::AllUrls,
            });
        }

        let (scheme_part, rest) = pattern
            .split_once("://")
            .ok_or(PatternError::MissingSchemeSeparator)?;
        let scheme = match scheme_part {
            "*" => SchemePattern::AnyWeb,
            s if SUPPORTED_SCHEMES.contains(&s) => SchemePattern::Exact(s.to_string()),
            other => return Err(PatternError::InvalidScheme(other.to_string())),
        };

        let slash = rest.find('/').ok_or(PatternError::MissingPath)?;
        let (authority, path) = rest.split_at(slash);

        let is_file = scheme == SchemePattern::Exact("file".to_string());
        let (host, port) = if authority.is_empty() {
            if !is_file {
                return Err(PatternError::MissingHost);
            }
            (HostPattern::Exact(String::new()), PortPattern::Any)
        } else {
            parse_authority(authority)?
        };

        Ok(Self {
            source,
            kind: Kind::Url {
                scheme,
                host,
                port,
                path: compile_path(path)?,
            },
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` if `url` falls under this pattern.
    pub fn matches_url(&self, url: &str) -> bool {
        let Some(parsed) = ParsedUrl::parse(url) else {
            return false;
        };
        self.matches_parsed(&parsed)
    }

    fn matches_parsed(&self, url: &ParsedUrl) -> bool {
        match &self.kind {
            Kind::AllUrls => SUPPORTED_SCHEMES.contains(&url.scheme.as_str()),
            Kind::Url {
                scheme,
                host,
                port,
                path,
            } => {
                let scheme_ok = match scheme {
                    SchemePattern::AnyWeb => WILDCARD_SCHEMES.contains(&url.scheme.as_str()),
                    SchemePattern::Exact(s) => *s == url.scheme,
                };
                let host_ok = match host {
                    HostPattern::Any => true,
                    HostPattern::Exact(h) => *h == url.host,
                    HostPattern::Suffix(suffix) => {
                        url.host == *suffix
                            || url
                                .host
                                .strip_suffix(suffix.as_str())
                                .map_or(false, |head| head.ends_with('.'))
                    }
                };
                let port_ok = match port {
                    PortPattern::Any => true,
                    PortPattern::Exact(p) => url.effective_port() == Some(*p),
                };
                scheme_ok && host_ok && port_ok && path.is_match(&url.path_and_query)
            }
        }
    }
}

impl fmt::Display for MatchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_authority(authority: &str) -> Result<(HostPattern, PortPattern), PatternError> {
    let (host, port) = split_host_port(authority);

    let port = match port {
        None | Some("*") => PortPattern::Any,
        Some(p) => p
            .parse::<u16>()
            .map(PortPattern::Exact)
            .map_err(|_| PatternError::InvalidPort(p.to_string()))?,
    };

    let host = host.to_ascii_lowercase();
    let host = if host == "*" {
        HostPattern::Any
    } else if let Some(suffix) = host.strip_prefix("*.") {
        if suffix.is_empty() || suffix.contains('*') {
            return Err(PatternError::InvalidHost(host));
        }
        HostPattern::Suffix(suffix.to_string())
    } else if host.is_empty() {
        return Err(PatternError::MissingHost);
    } else if host.contains('*') {
        return Err(PatternError::InvalidHost(host));
    } else {
        HostPattern::Exact(host)
    };

    Ok((host, port))
}

fn compile_path(path: &str) -> Result<Regex, PatternError> {
    let body: Vec<String> = path.split('*').map(regex::escape).collect();
    let expr = format!("^{}$", body.join(".*"));
    Regex::new(&expr).map_err(|e| PatternError::InvalidPath(e.to_string()))
}

/// Splits `host[:port]`, keeping bracketed IPv6 literals intact.
fn split_host_port(authority: &str) -> (&str, Option<&str>) {
    if authority.starts_with('[') {
        if let Some(end) = authority.find(']') {
            let host = &authority[..=end];
            let port = authority[end + 1..].strip_prefix(':');
            return (host, port);
        }
        return (authority, None);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    }
}

// ── URL decomposition ─────────────────────────────────────────────────────────

/// The parts of a URL a pattern looks at.
#[derive(Debug, PartialEq, Eq)]
struct ParsedUrl {
    scheme: String,
    host: String,
    port: Option<u16>,
    path_and_query: String,
}

impl ParsedUrl {
    fn parse(url: &str) -> Option<Self> {
        let (scheme, rest) = url.split_once("://")?;
        let scheme = scheme.to_ascii_lowercase();
        let valid_char = |c: char| c.is_ascii_alphanumeric() || "+-.".contains(c);
        if scheme.is_empty() || !scheme.chars().all(valid_char) {
            return None;
        }

        // Fragments never take part in matching.
        let rest = rest.split('#').next().unwrap_or_default();
        let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(authority_end);

        // Userinfo is not part of the host.
        let authority = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        let (host, port) = split_host_port(authority);
        let port = match port {
            None | Some("") => None,
            Some(p) => Some(p.parse::<u16>().ok()?),
        };

        let path_and_query = if tail.starts_with('/') {
            tail.to_string()
        } else {
            format!("/{tail}")
        };

        Some(Self {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
            path_and_query,
        })
    }

    fn effective_port(&self) -> Option<u16> {
        self.port.or(match self.scheme.as_str() {
            "http" | "ws" => Some(80),
            "https" | "wss" => Some(443),
            "ftp" => Some(21),
            _ => None,
        })
    }
}

// ── Operations over pattern lists ─────────────────────────────────────────────

/// Returns `true` iff `url` matches at least one syntactically valid pattern.
///
/// Invalid patterns are ignored; an empty list never matches.
pub fn matches<S: AsRef<str>>(url: &str, patterns: &[S]) -> bool {
    let Some(parsed) = ParsedUrl::parse(url) else {
        return false;
    };
    patterns
        .iter()
        .filter_map(|p| MatchPattern::parse(p.as_ref()).ok())
        .any(|p| p.matches_parsed(&parsed))
}

/// Splits `patterns` into the valid ones and error records, both in input order.
pub fn validate_patterns<S: AsRef<str>>(patterns: &[S]) -> (Vec<String>, Vec<MatchPatternError>) {
    let mut valid = Vec::new();
    let mut errors = Vec::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        match MatchPattern::parse(pattern) {
            Ok(_) => valid.push(pattern.to_string()),
            Err(e) => errors.push(MatchPatternError::new(pattern, e)),
        }
    }
    (valid, errors)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_pattern_list_never_matches() {
        let none: [&str; 0] = [];
        assert!(!matches("http://localhost/", &none));
    }

    #[test]
    fn test_all_urls_matches_supported_schemes_only() {
        assert!(matches("https://example.com/a", &[ALL_URLS]));
        assert!(matches("file:///tmp/x.html", &[ALL_URLS]));
        assert!(!matches("chrome://extensions/", &[ALL_URLS]));
    }

    #[test]
    fn test_wildcard_scheme_covers_web_schemes_not_ftp() {
        let patterns = ["*://example.com/*"];
        assert!(matches("http://example.com/", &patterns));
        assert!(matches("wss://example.com/socket", &patterns));
        assert!(!matches("ftp://example.com/", &patterns));
    }

    #[test]
    fn test_subdomain_wildcard_matches_domain_and_subdomains() {
        let patterns = ["https://*.example.com/*"];
        assert!(matches("https://example.com/", &patterns));
        assert!(matches("https://a.b.example.com/x", &patterns));
        assert!(!matches("https://notexample.com/", &patterns));
    }

    #[test]
    fn test_pattern_without_port_matches_any_port() {
        assert!(matches("http://localhost:3000/app", &["http://localhost/*"]));
    }

    #[test]
    fn test_explicit_port_uses_scheme_default() {
        let patterns = ["https://example.com:443/*"];
        assert!(matches("https://example.com/", &patterns));
        assert!(!matches("https://example.com:8443/", &patterns));
    }

    #[test]
    fn test_path_glob_includes_query() {
        let patterns = ["http://example.com/search?q=*"];
        assert!(matches("http://example.com/search?q=rust", &patterns));
        assert!(!matches("http://example.com/search", &patterns));
    }

    #[test]
    fn test_path_without_wildcard_is_exact() {
        let patterns = ["http://example.com/"];
        assert!(matches("http://example.com", &patterns));
        assert!(!matches("http://example.com/other", &patterns));
    }

    #[test]
    fn test_invalid_patterns_are_ignored_when_matching() {
        let patterns = ["http://exa*mple.com/*", "https://example.com/*"];
        assert!(matches("https://example.com/", &patterns));
        assert!(!matches("http://example.com/", &patterns));
    }

    #[test]
    fn test_userinfo_and_fragment_do_not_affect_host_or_path() {
        let patterns = ["https://example.com/page"];
        assert!(matches("https://user:pw@example.com/page#top", &patterns));
    }

    #[test]
    fn test_file_pattern_allows_empty_host() {
        assert!(matches("file:///home/me/index.html", &["file:///home/*"]));
    }

    #[test]
    fn test_grammar_errors() {
        assert_eq!(MatchPattern::parse("").unwrap_err(), PatternError::Empty);
        assert_eq!(
            MatchPattern::parse("example.com/*").unwrap_err(),
            PatternError::MissingSchemeSeparator
        );
        assert_eq!(
            MatchPattern::parse("gopher://example.com/*").unwrap_err(),
            PatternError::InvalidScheme("gopher".into())
        );
        assert_eq!(
            MatchPattern::parse("https://example.com").unwrap_err(),
            PatternError::MissingPath
        );
        assert_eq!(
            MatchPattern::parse("https:///x").unwrap_err(),
            PatternError::MissingHost
        );
        assert_eq!(
            MatchPattern::parse("https://foo.*.com/").unwrap_err(),
            PatternError::InvalidHost("foo.*.com".into())
        );
        assert_eq!(
            MatchPattern::parse("https://example.com:http/").unwrap_err(),
            PatternError::InvalidPort("http".into())
        );
    }

    #[test]
    fn test_validate_patterns_keeps_input_order() {
        let input = ["bad", "http://localhost/*", "also bad", "<all_urls>"];

        let (valid, errors) = validate_patterns(&input);

        assert_eq!(valid, vec!["http://localhost/*", "<all_urls>"]);
        assert_eq!(
            errors.iter().map(|e| e.pattern.as_str()).collect::<Vec<_>>(),
            vec!["bad", "also bad"]
        );
        assert_eq!(errors[0].error, PatternError::MissingSchemeSeparator.to_string());
    }

    #[test]
    fn test_unparseable_url_never_matches() {
        assert!(!matches("not a url", &[ALL_URLS]));
    }
}
