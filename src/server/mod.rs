//! Read-only HTTP surface

pub mod http;

pub use http::{run, AppState};
