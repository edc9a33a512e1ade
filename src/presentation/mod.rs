pub mod signals;
pub mod wasm_api;
