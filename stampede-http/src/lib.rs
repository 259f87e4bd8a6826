#![forbid(unsafe_code)]

mod client;
mod error;
mod types;
pub mod util;

pub use client::HttpClient;
pub use error::{Error, Result, TransportFailure};
pub use types::{HttpRequest, HttpResponse};
