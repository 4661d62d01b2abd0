//! Friday agent service
//!
//! An LLM chat agent exposed over HTTP. Each request runs one turn: the
//! session's saved agent state is loaded, a fresh agent is built and
//! hydrated, its output is streamed back, and its state is saved again.

pub mod agent;
pub mod api;
pub mod chat;
pub mod config;
pub mod deploy;
pub mod error;
pub mod runtime;
pub mod services;

pub use config::Config;
pub use error::AppError;
