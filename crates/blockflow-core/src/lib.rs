pub mod config;
pub mod error;
pub mod execution;
pub mod graph;
pub mod history;
pub mod observability;
pub mod ports;
pub mod session;
pub mod template;
pub mod viewer;

// Common entry points: the session coordinator plus the graph and state types it exposes.
pub use config::SessionConfig;
pub use error::{GraphError, RunnerError, SessionError, StoreError};
pub use execution::{
    BlockStatus, ExecutionId, ExecutionRecord, ExecutionTracker, RunnerEvent, WorkflowStatus,
};
pub use graph::{Block, BlockConfig, BlockId, Connection, ConnectionId, Position, Workflow};
pub use history::{HistoryManager, WorkflowVersion};
pub use session::EditorSession;
pub use template::TemplateResolver;
pub use viewer::ExecutionViewer;
