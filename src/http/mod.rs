//! HTTP module
//!
//! Request/response value types shared by every stage, plus the
//! reqwest-backed transport used by the bundled session providers.

mod client;
mod request;
mod response;

pub use client::HttpClient;
pub use request::{HttpMethod, Request, UPLOAD_FILE_NAME};
pub use response::ResponseSnapshot;
