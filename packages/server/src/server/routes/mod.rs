// HTTP routes
pub mod cache;
pub mod health;
pub mod jobs;
pub mod research;
pub mod stream;
