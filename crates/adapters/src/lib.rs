mod base_url;
mod error;
mod llm;
mod search;
#[cfg(test)]
mod test_server;

pub use base_url::{check_base_url, default_base_url, resolve_base_url};
pub use error::AdapterError;
pub use llm::{ChatOptions, OpenAiCompatibleModel};
pub use search::{SerperSearch, SERPER_ENDPOINT};
