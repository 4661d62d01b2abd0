//! Application configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults. A `.env` file in the working directory is loaded
//! first by the binary, so everything here can also come from there.

use serde_json::{json, Map, Value};
use std::env;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Agent identity and behaviour
    pub app: AppConfig,
    /// Model client configuration
    pub model: ModelConfig,
    /// Backing store configuration
    pub storage: StorageConfig,
    /// Background task and tool configuration
    pub tasks: TaskConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
}

/// Agent identity and behaviour
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Agent and application name
    pub name: String,
    /// Short description reported by the health endpoint
    pub description: String,
    /// System prompt given to every agent instance
    pub sys_prompt: String,
    /// Register the python execution tool with the agent
    pub enable_tools: bool,
    /// Serialize concurrent turns on the same session
    pub serialize_sessions: bool,
    /// Upper bound on reasoning/acting iterations per turn
    pub max_iters: usize,
}

/// Supported OpenAI-compatible providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    /// Zhipu GLM coding endpoint
    Glm,
    /// SiliconFlow hosted models
    SiliconFlow,
}

impl ModelProvider {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "glm" => Some(Self::Glm),
            "siliconflow" => Some(Self::SiliconFlow),
            _ => None,
        }
    }

    /// Default model name for the provider
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Glm => "glm-4.6",
            Self::SiliconFlow => "Qwen/Qwen3-8B",
        }
    }

    /// Default API base URL for the provider
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Glm => "https://open.bigmodel.cn/api/coding/paas/v4",
            Self::SiliconFlow => "https://api.siliconflow.cn/v1",
        }
    }

    /// Environment variable holding the API key
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::Glm => "GLM_API_KEY",
            Self::SiliconFlow => "SILICONFLOW_API_KEY",
        }
    }

    /// Provider-specific request body fields that turn reasoning off
    pub fn disable_thinking_body(&self) -> Map<String, Value> {
        let value = match self {
            Self::Glm => json!({ "thinking": { "type": "disabled" } }),
            Self::SiliconFlow => json!({ "enable_thinking": false }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Model client configuration
#[derive(Clone)]
pub struct ModelConfig {
    /// Provider the defaults below were derived from
    pub provider: ModelProvider,
    /// Model name sent with each request
    pub model_name: String,
    /// API key, if any
    pub api_key: Option<String>,
    /// Base URL of the chat completions API
    pub base_url: String,
    /// Request streamed completions
    pub stream: bool,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Extra fields merged into every request body
    pub extra_body: Map<String, Value>,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model_name", &self.model_name)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("stream", &self.stream)
            .field("timeout_secs", &self.timeout_secs)
            .field("extra_body", &self.extra_body)
            .finish()
    }
}

/// Which backing stores to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Process-local maps, lost on restart
    Memory,
    /// SQLite database file
    Sqlite,
}

/// Backing store configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Store implementation
    pub kind: StoreKind,
    /// SQLite database path (used when `kind` is `Sqlite`)
    pub db_path: PathBuf,
}

/// Background task and tool configuration
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Delay of the blocking demo task (in seconds)
    pub task_delay_secs: u64,
    /// Delay of the cooperative demo task (in seconds)
    pub atask_delay_secs: u64,
    /// Timeout for tool execution (in seconds)
    pub tool_timeout_secs: u64,
    /// How long a completed task record stays readable (in seconds)
    pub task_retention_secs: u64,
    /// Completed task records kept at most
    pub max_finished_tasks: usize,
}

impl Default for Config {
    fn default() -> Self {
        let provider = ModelProvider::Glm;
        Self {
            server: ServerConfig {
                port: 8090,
                host: "0.0.0.0".to_string(),
            },
            app: AppConfig {
                name: "Friday".to_string(),
                description: "A helpful assistant".to_string(),
                sys_prompt: "You're a helpful assistant named Friday.".to_string(),
                enable_tools: false,
                serialize_sessions: true,
                max_iters: 10,
            },
            model: ModelConfig {
                provider,
                model_name: provider.default_model().to_string(),
                api_key: None,
                base_url: provider.default_base_url().to_string(),
                stream: true,
                timeout_secs: 120,
                extra_body: provider.disable_thinking_body(),
            },
            storage: StorageConfig {
                kind: StoreKind::Memory,
                db_path: default_db_path(),
            },
            tasks: TaskConfig {
                task_delay_secs: 30,
                atask_delay_secs: 15,
                tool_timeout_secs: 300,
                task_retention_secs: 3600,
                max_finished_tasks: 1000,
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let provider = env::var("FRIDAY_MODEL_PROVIDER")
            .ok()
            .and_then(|p| ModelProvider::parse(&p))
            .unwrap_or(defaults.model.provider);

        Self {
            server: ServerConfig {
                port: parsed("PORT").unwrap_or(defaults.server.port),
                host: env::var("HOST").unwrap_or(defaults.server.host),
            },
            app: AppConfig {
                name: env::var("FRIDAY_APP_NAME").unwrap_or(defaults.app.name),
                description: env::var("FRIDAY_APP_DESCRIPTION")
                    .unwrap_or(defaults.app.description),
                sys_prompt: env::var("FRIDAY_SYS_PROMPT").unwrap_or(defaults.app.sys_prompt),
                enable_tools: flag("FRIDAY_ENABLE_TOOLS").unwrap_or(defaults.app.enable_tools),
                serialize_sessions: flag("FRIDAY_SERIALIZE_SESSIONS")
                    .unwrap_or(defaults.app.serialize_sessions),
                max_iters: parsed("FRIDAY_MAX_ITERS")
                    .filter(|&n: &usize| n > 0)
                    .unwrap_or(defaults.app.max_iters),
            },
            model: ModelConfig {
                provider,
                model_name: env::var("FRIDAY_MODEL_NAME")
                    .unwrap_or_else(|_| provider.default_model().to_string()),
                api_key: env::var(provider.api_key_var())
                    .ok()
                    .filter(|k| !k.trim().is_empty()),
                base_url: env::var("FRIDAY_MODEL_BASE_URL")
                    .unwrap_or_else(|_| provider.default_base_url().to_string()),
                stream: flag("FRIDAY_MODEL_STREAM").unwrap_or(defaults.model.stream),
                timeout_secs: parsed("FRIDAY_MODEL_TIMEOUT_SECS")
                    .unwrap_or(defaults.model.timeout_secs),
                extra_body: provider.disable_thinking_body(),
            },
            storage: StorageConfig {
                kind: match env::var("FRIDAY_STORE").as_deref() {
                    Ok("sqlite") => StoreKind::Sqlite,
                    _ => StoreKind::Memory,
                },
                db_path: env::var("FRIDAY_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.db_path),
            },
            tasks: TaskConfig {
                task_delay_secs: parsed("FRIDAY_TASK_DELAY_SECS")
                    .unwrap_or(defaults.tasks.task_delay_secs),
                atask_delay_secs: parsed("FRIDAY_ATASK_DELAY_SECS")
                    .unwrap_or(defaults.tasks.atask_delay_secs),
                tool_timeout_secs: parsed("FRIDAY_TOOL_TIMEOUT_SECS")
                    .unwrap_or(defaults.tasks.tool_timeout_secs),
                task_retention_secs: parsed("FRIDAY_TASK_RETENTION_SECS")
                    .unwrap_or(defaults.tasks.task_retention_secs),
                max_finished_tasks: parsed("FRIDAY_MAX_FINISHED_TASKS")
                    .unwrap_or(defaults.tasks.max_finished_tasks),
            },
        }
    }

    /// Get the server address as a string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

fn default_db_path() -> PathBuf {
    // Default to ~/.friday or current directory
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".friday").join("friday.db"),
        None => PathBuf::from(".friday").join("friday.db"),
    }
}
