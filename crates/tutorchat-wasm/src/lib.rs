use wasm_bindgen::prelude::*;
use web_sys::Window;

mod app;
mod executor;
mod http;
mod protocol;
mod storage;
mod utils;

pub use app::TutorChat;
pub use executor::BrowserExecutor;
pub use http::HttpBackend;
pub use protocol::*;
pub use storage::LocalStorage;

/// Initialize the WASM module
/// This sets up panic hooks and logging
#[wasm_bindgen(start)]
pub fn init() {
    // Set panic hook for better error messages
    console_error_panic_hook::set_once();

    // Initialize logging
    wasm_logger::init(wasm_logger::Config::default());

    log::info!("TutorChat WASM initialized");
}

/// Get the window object
fn window() -> Result<Window, JsValue> {
    web_sys::window().ok_or_else(|| JsValue::from_str("No window object"))
}
