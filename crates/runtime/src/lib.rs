//! The cadre runtime: a team of named agents cooperatively executing a user
//! task over LLM conversations augmented with tool use.
//!
//! One [`Runtime::run`] processes one [`Session`] until the current agent
//! produces a non-tool finish reason: stream the model turn, dispatch tool
//! calls, resolve agent-to-agent delegation (`transfer_task` / `handoff`),
//! and repeat. Observers receive [`Event`]s synchronously as the run
//! progresses.

mod agent;
mod dispatch;
mod error;
mod event;
mod run;
mod session;
mod team;
mod title;
mod tool;

pub use agent::Agent;
pub use dispatch::{AllowAll, Approval, ApprovalPolicy, REJECTION_SENTINEL, ToolDispatcher};
pub use error::{RuntimeError, RuntimeResult as Result};
pub use event::{Event, EventSink, SwitchReason, ToolCallStatus};
pub use run::{RunOptions, Runtime};
pub use session::{Session, SessionEntry};
pub use team::Team;
pub use tool::{Tool, ToolContext, ToolRegistry, ToolSet};
