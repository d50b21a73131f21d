//! Agent runtime adapters.

pub mod http;
pub mod mock;

pub use http::{AgentRuntimeError, HttpAgentRuntime};
pub use mock::{MockAgentRuntime, MockResponse, MockScript, RecordedCall};
