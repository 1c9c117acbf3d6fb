//! Browser runtime backing the login engine.

mod chromium;
mod script;

pub use chromium::ChromiumLauncher;
