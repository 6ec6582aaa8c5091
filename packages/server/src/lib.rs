// Research Pipeline Server
//
// HTTP front end for the research pipeline: job control, live progress
// over SSE, report retrieval and content cache administration.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
