//! Automatic output capture for AI-driven shell commands.
//!
//! Intercepts Bash tool calls before execution and, when a command pipes its
//! output through a filter, splices in a `tee` stage so the complete
//! unfiltered output survives in a temp file. The companion modules parse
//! capture announcements back out of transcripts, score how fresh an old
//! capture still is, and publish the capture history to the environment.

use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod capture_refs;
pub mod config;
pub mod env_export;
pub mod freshness;
pub mod inspector;
pub mod ledger;
pub mod policy;
pub mod quoting;
pub mod rewriter;
pub mod semantic;

use config::Config;
use inspector::Inspector;
use policy::{Policy, EXPENSIVE_PATTERNS};
use rewriter::Rewriter;

/// Hook payload wrapping a pending tool call. Unknown fields are preserved
/// verbatim through the flatten maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<Tool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<ToolInput>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Process one hook payload: rewrite the command of a Bash tool call when
/// the policy accepts it, pass everything else through untouched.
pub fn process_hook_input(input: &str, config: &Config) -> Result<String> {
    let mut hook_data: HookData =
        serde_json::from_str(input).context("failed to parse hook JSON")?;

    if let Some(tool) = hook_data.tool.as_mut() {
        if tool.name == "Bash" {
            if let Some(tool_input) = tool.input.as_mut() {
                if let Some(command) = tool_input.command.as_deref() {
                    if let Some(rewritten) = rewrite_command(command, config) {
                        tool_input.command = Some(rewritten);
                    }
                }
            }
        }
    }

    serde_json::to_string_pretty(&hook_data).context("failed to serialize hook JSON")
}

/// Decide and rewrite in one step. Returns `None` when the command should
/// run unmodified. A panic anywhere in inspection or rewriting is treated
/// as a decline; the hook must never break the command it wraps.
pub fn rewrite_command(command: &str, config: &Config) -> Option<String> {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let facts = Inspector::with_trivial_max_len(config.activation.trivial_max_len)
            .inspect(command);

        let mut policy = Policy::new().with_min_command_len(config.activation.min_command_len);
        if config.activation.enable_pattern_catalog {
            policy = policy.with_catalog(EXPENSIVE_PATTERNS.clone());
        }

        if !policy.decide(command, &facts).should_rewrite {
            return None;
        }

        let rewriter = Rewriter::with_options(
            &config.capture.file_prefix,
            config.capture.truncate_lines,
        );
        Some(rewriter.rewrite(command).text)
    }));

    match outcome {
        Ok(result) => result,
        Err(_) => {
            warn!(command, "rewrite panicked, passing command through");
            None
        }
    }
}
