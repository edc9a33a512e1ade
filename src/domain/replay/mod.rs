//! Historical replay bundles and the checkpoint+diff reconstruction of
//! overlay activity and factor state.

pub mod factor_log;
pub mod window;

pub use factor_log::*;
pub use window::*;
