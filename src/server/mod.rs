//! HTTP front end

pub mod files;
pub mod http;
pub mod upload;

pub use http::{run, serve, AppState};
pub use upload::Uploads;
