//! Adapters from the domain ports to the browser: HTTP, WebSocket push,
//! request de-duplication and runtime services.

pub mod http;
pub mod request_cache;
pub mod services;
pub mod websocket;
