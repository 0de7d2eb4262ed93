//! Network adapters: the WebSocket server bridges connect to.

pub mod ws_server;

pub use ws_server::{bind, run_server};
