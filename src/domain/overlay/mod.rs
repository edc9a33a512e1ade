//! Overlay instruction catalog: versioned definitions, the active subset,
//! and the views derived from them.

pub mod catalog;
pub mod instruction;
pub mod render;
pub mod visibility;

pub use catalog::*;
pub use instruction::*;
pub use render::*;
pub use visibility::*;
