//! Python code execution tool
//!
//! Runs a snippet with the system Python interpreter and reports its exit
//! code, stdout and stderr back to the model.

use super::error::ToolError;
use super::ToolFunction;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Interpreter used when none is configured
pub const DEFAULT_INTERPRETER: &str = "python3";

#[derive(Deserialize)]
struct Arguments {
    code: String,
}

/// `execute_python_code` tool
pub struct ExecutePythonCode {
    interpreter: String,
    /// Timeout for one execution
    timeout: Duration,
}

impl ExecutePythonCode {
    /// Create the tool with the default interpreter
    pub fn new(timeout_secs: u64) -> Self {
        Self::with_interpreter(DEFAULT_INTERPRETER, timeout_secs)
    }

    /// Create the tool with a specific interpreter
    pub fn with_interpreter(interpreter: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn run(&self, code: &str) -> Result<String, ToolError> {
        info!(
            interpreter = %self.interpreter,
            code_len = code.len(),
            "Executing python code"
        );

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let returncode = output.status.code().unwrap_or(-1);
                debug!(returncode = returncode, "Python code finished");
                Ok(format!(
                    "<returncode>{}</returncode><stdout>{}</stdout><stderr>{}</stderr>",
                    returncode,
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                ))
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to spawn python interpreter");
                Err(ToolError::SpawnFailed(e))
            }
            Err(_) => {
                error!(
                    timeout_secs = self.timeout.as_secs(),
                    "Python code execution timed out"
                );
                Err(ToolError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}

#[async_trait]
impl ToolFunction for ExecutePythonCode {
    fn name(&self) -> &str {
        "execute_python_code"
    }

    fn description(&self) -> &str {
        "Execute the given python code and return the return code, standard output and \
         standard error. Use print() to output results."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The Python code to be executed."
                }
            },
            "required": ["code"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let args: Arguments = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        self.run(&args.code).await
    }
}
