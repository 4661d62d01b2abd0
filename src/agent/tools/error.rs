//! Tool error types
//!
//! Errors that can occur while a tool runs (argument decoding, process
//! spawning, timeouts).

use thiserror::Error;

/// Errors that can occur during tool execution
#[derive(Error, Debug)]
pub enum ToolError {
    /// No tool with this name is registered
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments were not valid JSON or missed a required field
    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// Tool execution exceeded the timeout limit
    #[error("Tool execution timed out after {0} seconds")]
    Timeout(u64),

    /// Failed to spawn the process (e.g., interpreter not found)
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[from] std::io::Error),
}
