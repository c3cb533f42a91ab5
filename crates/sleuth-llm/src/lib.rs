//! Collaborator agents: the OpenAI-compatible HTTP client, the retrying
//! wrapper around it, and a scripted mock for tests.

pub mod mock;
pub mod openai;
pub mod reliable;

pub use mock::{MockAgent, MockResponse};
pub use openai::{OpenAiAgent, OpenAiConfig};
pub use reliable::{ReliableAgent, ReliableConfig};
