//! Infrastructure layer for the content side: the socket transport to the
//! background service.

pub mod ws_connector;

pub use ws_connector::WsConnector;
