//! # otel-relay-core
//!
//! Shared library for the telemetry relay containing the cross-context message
//! taxonomy, the typed channel abstraction, the configuration model and its
//! serialization formats, the quoted key-value parser, and the URL match-pattern
//! grammar.
//!
//! This crate is used by both the background service and the content-side
//! components. It has no dependencies on sockets, HTTP clients, or files.
//!
//! # Architecture overview
//!
//! Telemetry collected inside a web page has to cross three isolated execution
//! contexts before it reaches a collector:
//!
//! ```text
//! main context (page realm)  ──page events──►  bridge  ──channel──►  background ──HTTP──► collector
//!            ▲                                    │                      │
//!            └─────────── ConfigurationChanged ◄──┴──── StorageChanged ◄─┘
//! ```
//!
//! - **`protocol`** – The closed set of messages that travel between contexts,
//!   and the [`protocol::Channel`] that carries them as structured JSON values.
//!
//! - **`domain`** – The [`Configuration`] model (backend slice + content slice),
//!   the insertion-ordered [`OrderedMap`], and the match-pattern grammar used to
//!   decide which pages may talk to the background.
//!
//! - **`serialization`** – The two textual forms of a configuration: the
//!   storage form (ordered maps tagged so they survive a plain key-value store)
//!   and the editor form (ordered maps flattened to plain objects).
//!
//! - **`text`** – The quoted key-value parser that turns user-typed header
//!   strings such as `a:b, "c d":'e,f'` into an [`OrderedMap`].

pub mod domain;
pub mod protocol;
pub mod serialization;
pub mod text;

pub use domain::configuration::{
    BackendConfiguration, Configuration, ContentConfiguration, ContentPatch, Instrumentation,
};
pub use domain::match_pattern::{matches, MatchPattern, MatchPatternError, PatternError};
pub use domain::ordered_map::OrderedMap;
pub use protocol::channel::{Channel, ChannelError, Port, SenderInfo};
pub use protocol::messages::{FromBackground, Handshake, PageMessage, TelemetryKind, ToBackground};
pub use serialization::{ConfigError, StorageItems};
pub use text::key_value::{parse_key_values, KeyValueParser, ParseOutcome, RemainderPolicy};
