//! Live series session: state machine, owned context and observation port.

pub mod context;
pub mod controller;
pub mod observer;

pub use context::*;
pub use controller::*;
pub use observer::*;
