//! Trait seams for external collaborators.

pub mod fetcher;
pub mod model;
pub mod searcher;
pub mod store;
