//! HTTP implementations of the session's transports.

pub mod agent;
pub mod sse;
pub mod statements;

pub use agent::{http_client, Credentials, HttpAgentTransport};
pub use sse::SseDecoder;
pub use statements::HttpStatementExecutor;
