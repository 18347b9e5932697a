//! Programmable mock HTTP endpoint for client tests.
//!
//! A test registers canned responses grouped into named modes, starts a
//! [`MockServer`], sends requests through a real HTTP client and then pulls the
//! requests the server captured with [`wait_for_server_request`].
//!
//! ## Module Structure
//!
//! - `types`: request/response data, header multimap, error types
//! - `config`: server configuration and YAML/JSON loading
//! - `registry`: stub tables per mode and the active mode
//! - `capture`: bounded queue of captured requests
//! - `handler`: per-request dispatch
//! - `server`: listener lifecycle
//! - `client`: request helper
//! - `assertions`: comparison helpers reporting every mismatch

pub mod assertions;
pub mod client;
pub mod config;
pub mod logging;
pub mod server;
pub mod types;

mod capture;
mod handler;
mod registry;

#[cfg(test)]
mod tests;

pub use assertions::{compare_requests, compare_responses, contains_headers, Mismatches};
pub use client::do_request;
pub use config::{Configuration, DEFAULT_MODE};
pub use server::{wait_for_server_request, MockServer};
pub use types::{
    CaptureError, ClientError, ConfigError, Headers, RequestData, ResponseData, ServerError,
};
