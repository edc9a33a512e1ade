use wasm_bindgen::prelude::*;

#[macro_use]
pub mod macros;

pub mod application;
pub mod domain;
pub mod global_state;
pub mod infrastructure;
pub mod presentation;

use crate::domain::logging::LogComponent;

/// Install the console logger, the browser clock and the panic hook.
#[wasm_bindgen(start)]
pub fn initialize() {
    console_error_panic_hook::set_once();

    let logger = if cfg!(debug_assertions) {
        infrastructure::services::ConsoleLogger::new_development()
    } else {
        infrastructure::services::ConsoleLogger::new_production()
    };
    domain::logging::init_logger(Box::new(logger));
    domain::logging::init_time_provider(Box::new(infrastructure::services::BrowserTimeProvider::new()));

    log_info!(LogComponent::Presentation("Initialize"), "Chart sync core initialized");
}
