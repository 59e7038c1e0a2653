//! Minimal HTTP/1.1 client for the bundled request workload.
//!
//! Requests carry raw bodies; responses report status, body, wire-size estimates and the
//! time from sending the request to reading the last body byte.

#![forbid(unsafe_code)]

mod client;
mod error;
mod types;
mod wire;

pub use client::HttpClient;
pub use error::{Error, ErrorKind, Result};
pub use http::Method;
pub use types::{HttpRequest, HttpResponse};
pub use wire::estimate_request_bytes;
