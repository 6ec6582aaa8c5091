// Kernel - service wiring shared by the HTTP layer and tests

pub mod deps;

pub use deps::ServerDeps;
