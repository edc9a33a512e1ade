pub mod errors;
pub mod events;
pub mod factor;
pub mod logging;
pub mod market_data;
pub mod overlay;
pub mod replay;
pub mod repositories;
