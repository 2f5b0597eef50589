use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("research lookup failed: {message}")]
pub struct ResearchError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ResearchError {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

/// Web search used to ground outlines in current material.
#[async_trait]
pub trait ResearchSource: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, ResearchError>;
}
