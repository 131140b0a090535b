use llm::LlmError;
use thiserror::Error;

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Errors surfaced by [`crate::Runtime::run`] and team construction.
///
/// Anything expressible as a tool failure never reaches this type: the loop
/// turns it into a tool-role message and continues, letting the model
/// recover.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Malformed team or agent wiring, rejected before any model call.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A named agent does not exist in the team.
    #[error("Unknown agent '{0}'")]
    UnknownAgent(String),

    /// The host cancelled the run.
    #[error("Run cancelled")]
    Cancelled,

    /// The run exceeded its iteration guard.
    #[error("Run exceeded {0} iterations")]
    IterationLimit(usize),

    /// Provider-side failure that aborted the current turn.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Invariant violation inside the runtime.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Stable kind string, mirrored into [`crate::Event::Error`].
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) | Self::UnknownAgent(_) => "invalid_config",
            Self::Cancelled => "cancelled",
            Self::IterationLimit(_) | Self::Internal(_) => "internal",
            Self::Llm(error) => error.error_type(),
        }
    }
}
