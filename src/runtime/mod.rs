//! Request lifecycle and application runtime

pub mod context;
pub mod locks;
pub mod request;
pub mod tasks;
pub mod turn;

pub use context::{AppContext, Services};
pub use request::{AgentRequest, OutputMessage};
pub use tasks::{TaskQueue, TaskRecord, TaskStatus, TaskWork};
pub use turn::{TurnController, TurnStream};
