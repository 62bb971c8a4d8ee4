//! Wire-level prompt construction
//!
//! Targets read newline-delimited JSON on stdin. The record shape is a
//! wire contract with the target CLI: discriminator `"user"`, empty
//! session id, nested user message with a text content block, and a null
//! `parent_tool_use_id`. Anything else is silently ignored by the
//! consumer, so the serde structs below are the single source of truth
//! for the shape.

use serde::{Deserialize, Serialize};

use crate::signal::{SignalMode, WakeSignal};

/// One stdin record in the target's interactive input schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: String,
    pub message: MessageBody,
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Fixed template for cognitive-mode delivery: the message content has
/// already been placed in the recipient's context.
const COGNITIVE_TEMPLATE: &str = "You have a wake signal from {from}: {message}\n\
A context block with the full message has been injected into your working \
context. Review it now, then acknowledge with `nudge ack {agent}`. If the \
block is missing, recover it with `nudge recall {agent}`.";

/// Fixed template for inbox-mode delivery: the recipient pulls the
/// message through the inbox command.
const INBOX_TEMPLATE: &str = "You have a wake signal from {from}. \
Run `nudge inbox {agent}` to fetch your queued messages, handle them, \
then acknowledge with `nudge ack {agent}`.";

/// Manual check text used by the force-check path.
const CHECK_TEMPLATE: &str = "Check your inbox now: run `nudge inbox {agent}` \
and handle anything queued, then acknowledge with `nudge ack {agent}`.";

fn fill(template: &str, agent_id: &str, from: &str, message: &str) -> String {
    template
        .replace("{agent}", agent_id)
        .replace("{from}", from)
        .replace("{message}", message)
}

/// Wrap prompt text in the wire record, newline-terminated.
pub fn wire_line(text: &str) -> String {
    let record = InputRecord {
        kind: "user".to_string(),
        session_id: String::new(),
        message: MessageBody {
            role: "user".to_string(),
            content: vec![ContentBlock {
                kind: "text".to_string(),
                text: text.to_string(),
            }],
        },
        parent_tool_use_id: None,
    };
    // InputRecord serialization cannot fail: no maps, no non-string keys
    let mut line = serde_json::to_string(&record).unwrap_or_default();
    line.push('\n');
    line
}

/// Render the delivery prompt for a signal, selected by its mode.
pub fn build(signal: &WakeSignal) -> String {
    let template = match signal.mode {
        SignalMode::Cognitive => COGNITIVE_TEMPLATE,
        SignalMode::Inbox => INBOX_TEMPLATE,
    };
    fill(template, &signal.agent_id, &signal.from, &signal.message)
}

/// Render the manual inbox-check prompt used outside the mailbox flow.
pub fn build_check(agent_id: &str) -> String {
    fill(CHECK_TEMPLATE, agent_id, "", "")
}
