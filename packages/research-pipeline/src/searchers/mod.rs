//! Web search providers.

pub mod serpapi;
pub mod tavily;

pub use serpapi::SerpApiSearcher;
pub use tavily::TavilySearcher;

use crate::error::PipelineError;

fn search_error(provider: &str, reason: impl ToString) -> PipelineError {
    PipelineError::Search {
        provider: provider.to_string(),
        reason: reason.to_string(),
    }
}
