//! The two built-in tools and their dispatcher

pub mod dispatcher;
pub mod search;

pub use dispatcher::{
    error_envelope, execution_envelope, ToolDispatcher, ToolError, ToolInvocation, ToolResult,
};
pub use search::{SearchClient, SearchError, SearchHit};
