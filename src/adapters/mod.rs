pub mod anthropic;
pub mod llm;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use llm::{create_adapter, LLMAdapter, LLMRequest, LLMResponse, ModelConfig};
pub use openai::OpenAIAdapter;
