//! Generation-service boundary.
//!
//! The [`Generator`] trait decouples the pipeline from the actual service
//! transport (currently a CLI invoked per call). Responses are free text
//! expected to contain one structured object; [`request_object`] extracts it
//! and requests a single corrected response when extraction fails. Tests use
//! scripted generators that return predetermined payloads.

use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::extract::extract_object;
use crate::io::process::run_command_with_timeout;

/// One conversation turn carried to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Parameters for one service invocation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    /// The role the service should assume (decomposer, implementer, …).
    pub role: String,
    /// Structured context rendered into the conversation.
    pub context: Value,
    /// Prior turns, oldest first.
    pub history: Vec<Message>,
}

impl GenerationRequest {
    pub fn new(role: &str, context: Value) -> Self {
        Self {
            role: role.to_string(),
            context,
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// Abstraction over generation-service backends.
pub trait Generator {
    /// Send the request and return the service's free-text reply.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Generator that shells out to a configured command, feeding the request
/// as JSON on stdin and reading the reply from stdout.
pub struct ProcessGenerator {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ProcessGenerator {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            timeout,
            output_limit_bytes,
        }
    }
}

impl Generator for ProcessGenerator {
    #[instrument(skip_all, fields(role = %request.role, timeout_secs = self.timeout.as_secs()))]
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("empty generator command"))?;
        info!(%program, "invoking generation service");

        let payload = serde_json::to_vec(request).context("serialize generation request")?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        let output =
            run_command_with_timeout(cmd, Some(&payload), self.timeout, self.output_limit_bytes)
                .context("run generation service")?;

        if output.timed_out {
            warn!("generation service timed out");
            return Err(anyhow!(
                "generation service timed out after {:?}",
                self.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generation service failed");
            return Err(anyhow!(
                "generation service failed with status {:?}",
                output.status.code()
            ));
        }

        debug!("generation service replied");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Call the service and extract the embedded object, requesting one
/// corrected response when the reply holds no well-formed object.
pub fn request_object<G: Generator>(
    generator: &G,
    request: &GenerationRequest,
) -> Result<Value> {
    let reply = generator.generate(request)?;
    match extract_object(&reply) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            warn!(%first_err, "no object in reply, requesting corrected response");
            let mut corrected = request.clone();
            corrected.history.push(Message {
                role: MessageRole::Assistant,
                content: reply,
            });
            corrected.history.push(Message {
                role: MessageRole::User,
                content: "The previous reply did not contain a single well-formed JSON object. \
                          Reply again with only the JSON object, no surrounding text."
                    .to_string(),
            });
            let retry_reply = generator.generate(&corrected)?;
            extract_object(&retry_reply).context("corrected response still held no object")
        }
    }
}
