pub mod accumulator;
pub mod followup;
pub mod interpret;
pub mod message;
pub mod provider;
pub mod request;
pub mod router;
pub mod session;
pub mod stream;
pub mod table;
pub mod transcript;

pub use interpret::{interpret_event, InterpretError};
pub use message::{ContentBlock, Message, MessageId, Role, ToolResultContent, ToolResults, ToolUse};
pub use provider::{AgentTransport, SseStream, StatementExecutor, TransportError};
pub use request::{AgentRequest, AgentSettings, StatementRequest, ToolSpec};
pub use router::{route_primary, Routed, SqlTrigger};
pub use session::{
    AgentSession, AgentState, Notice, NoticeLevel, SessionError, SessionSnapshot, TurnOutcome,
};
pub use stream::{AgentEvent, ContentFragment, SseEvent};
pub use table::StatementResponse;
pub use transcript::{strip_sql_tables, Transcript};
