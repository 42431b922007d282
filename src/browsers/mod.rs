//! Browser backends

pub mod chromium;
#[cfg(test)]
pub mod scripted;

pub use chromium::ChromiumEngine;
