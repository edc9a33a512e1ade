//! Market data aggregate: bars, series identity and the bounded candle window.

pub mod entities;
pub mod services;
pub mod value_objects;

pub use entities::*;
pub use services::*;
pub use value_objects::*;
