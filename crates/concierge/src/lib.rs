//! Conversational tool dispatch.
//!
//! An [`Oracle`] reads each utterance and either answers it or proposes a
//! tool call. The [`DispatchEngine`] checks the proposal against the merged
//! catalogue of local tools and remote tool services, makes the call, and
//! turns the outcome into a [`ConversationTurn`].

pub mod dispatch;
pub mod oracle;
pub mod remotes;
pub mod session;
pub mod telemetry;
pub mod tools;
pub mod types;

pub use dispatch::{CatalogError, DispatchEngine, DispatchSettings, RemoteService};
pub use oracle::{OpenAiOracle, Oracle, OracleError, OracleReply, OracleRequest, ToolProposal};
pub use session::Session;
pub use tools::{ImageGenerator, LocalTool, LocalToolSet, ScheduleLookup};
pub use types::*;
