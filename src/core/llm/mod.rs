//! The LLM gateway and its provider seam.

mod gateway;
mod gemini;
pub mod prompts;
mod response;

pub use gateway::{LlmGateway, ModelCallError, ModelClient};
pub use gemini::GeminiClient;
pub use response::{clean_markdown, extract_json_object, extract_mermaid};
