//! Push channel: subscribe frame, message decoding and the WebSocket adapter.

pub mod dto;
pub mod push_client;

pub use dto::*;
pub use push_client::*;
