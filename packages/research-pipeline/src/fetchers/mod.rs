//! Fetcher implementations and HTML helpers.

pub mod html;
pub mod http;

pub use http::{HttpFetcher, DEFAULT_USER_AGENT};
