//! Language model clients and the static server registry.

pub mod ollama;
pub mod openai;
pub mod registry;

pub use ollama::OllamaModel;
pub use openai::OpenAiCompatibleModel;
pub use registry::StaticModelRegistry;
