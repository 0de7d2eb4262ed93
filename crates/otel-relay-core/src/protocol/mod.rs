//! Protocol module containing the message taxonomy and the typed channel.

pub mod channel;
pub mod messages;

pub use channel::{Channel, ChannelError, Port, SenderInfo};
pub use messages::*;
