//! Language model abstraction.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ExtractionResult, Result};
use crate::types::job::ServerType;

/// Opaque text-completion capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send a prompt and return the raw completion text.
    async fn complete(&self, prompt: &str) -> ExtractionResult<String>;

    /// Model identifier for logging.
    fn model_name(&self) -> &str;
}

/// Resolves `(server_type, server_name, model_name)` to a usable model.
///
/// The server registry itself lives outside the pipeline; this is the narrow
/// interface it exposes.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn resolve(
        &self,
        server_type: ServerType,
        server_name: &str,
        model_name: &str,
    ) -> Result<Arc<dyn LanguageModel>>;
}
