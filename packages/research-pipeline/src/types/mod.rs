//! Core data types.

pub mod cache;
pub mod config;
pub mod draft;
pub mod event;
pub mod job;
pub mod report;
