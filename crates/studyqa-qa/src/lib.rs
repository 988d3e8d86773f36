//! Retrieval-augmented answering over namespaced course material.

pub mod engine;
pub mod openai;
pub mod prompt;
pub mod sanitize;

pub use engine::{build_context, QaOptions, RetrievalQa};
pub use openai::OpenAiChat;
pub use prompt::PromptTemplate;
pub use sanitize::sanitize_response;
