//! Human-in-the-loop approval gate
//!
//! | mode          | read-only | destructive |
//! |---------------|-----------|-------------|
//! | `auto`        | run       | confirm     |
//! | `preview`     | confirm   | confirm     |
//! | `destructive` | run       | confirm     |

mod prompt;
mod ui_thread;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use hbridge_protocol::ApprovalMode;
use tracing::{debug, info};

pub use prompt::{
    ApprovalPrompt, ConsolePrompt, HeadlessPrompt, PromptRequest, ScriptedPrompt, Severity,
};
pub use ui_thread::{ui_prompt, UiPromptHandle, UiPromptPump};

const APPROVAL_TITLE: &str = "hbridge - Approval Required";
const BATCH_TITLE: &str = "hbridge - Batch Approval";
const APPROVAL_HELP: &str = "AI agent is requesting to perform this operation. Review carefully.";

const EXECUTE: usize = 0;
const EXECUTE_ALL: usize = 0;
const REVIEW_EACH: usize = 1;
const CANCEL_ALL: usize = 2;

/// One command as presented in a batch approval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub description: String,
    pub preview: String,
    pub is_destructive: bool,
}

fn encode_mode(mode: ApprovalMode) -> u8 {
    match mode {
        ApprovalMode::Auto => 0,
        ApprovalMode::Preview => 1,
        ApprovalMode::Destructive => 2,
    }
}

fn decode_mode(raw: u8) -> ApprovalMode {
    match raw {
        1 => ApprovalMode::Preview,
        2 => ApprovalMode::Destructive,
        _ => ApprovalMode::Auto,
    }
}

/// Holds the approval mode and asks the operator when it demands
pub struct ApprovalManager {
    mode: AtomicU8,
    prompt: Arc<dyn ApprovalPrompt>,
}

impl ApprovalManager {
    pub fn new(mode: ApprovalMode, prompt: Arc<dyn ApprovalPrompt>) -> Self {
        Self {
            mode: AtomicU8::new(encode_mode(mode)),
            prompt,
        }
    }

    pub fn mode(&self) -> ApprovalMode {
        decode_mode(self.mode.load(Ordering::SeqCst))
    }

    /// Switch mode, returning the previous one
    pub fn set_mode(&self, mode: ApprovalMode) -> ApprovalMode {
        let previous = decode_mode(self.mode.swap(encode_mode(mode), Ordering::SeqCst));
        info!(from = %previous, to = %mode, "Approval mode changed");
        previous
    }

    /// Approval table, independent of any manager state
    pub fn requires_approval_for(mode: ApprovalMode, is_destructive: bool) -> bool {
        match mode {
            ApprovalMode::Auto | ApprovalMode::Destructive => is_destructive,
            ApprovalMode::Preview => true,
        }
    }

    pub fn requires_approval(&self, is_destructive: bool) -> bool {
        Self::requires_approval_for(self.mode(), is_destructive)
    }

    /// Ask the operator about one command. Returns true without asking when
    /// the current mode does not require approval.
    pub fn request_approval(&self, description: &str, preview: &str, is_destructive: bool) -> bool {
        if !self.requires_approval(is_destructive) {
            return true;
        }

        let request = PromptRequest {
            title: APPROVAL_TITLE.to_string(),
            message: format!(
                "AI Agent Request:\n\n{}\n\n{}\n\nExecute this operation?",
                description, preview
            ),
            help: Some(APPROVAL_HELP.to_string()),
            choices: vec!["Execute".to_string(), "Cancel".to_string()],
            default_choice: 1,
            close_choice: 1,
            severity: if is_destructive {
                Severity::Warning
            } else {
                Severity::Message
            },
        };

        let approved = self.ask(&request) == EXECUTE;
        info!(description, destructive = is_destructive, approved, "Approval decided");
        approved
    }

    /// Decide a batch. One prompt offers Execute All, Review Each and Cancel
    /// All. Review Each asks per item in order and denies every item after the
    /// first denial without asking. No prompt is shown when no item needs
    /// approval.
    pub fn approve_batch(&self, items: &[BatchItem]) -> Vec<bool> {
        if !items.iter().any(|item| self.requires_approval(item.is_destructive)) {
            debug!(count = items.len(), "Batch needs no approval");
            return vec![true; items.len()];
        }

        let listing = items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {}", i + 1, item.description))
            .collect::<Vec<_>>()
            .join("\n");

        let request = PromptRequest {
            title: BATCH_TITLE.to_string(),
            message: format!(
                "AI Agent Batch Request ({} operations):\n\n{}\n\nExecute all?",
                items.len(),
                listing
            ),
            help: None,
            choices: vec![
                "Execute All".to_string(),
                "Review Each".to_string(),
                "Cancel All".to_string(),
            ],
            default_choice: REVIEW_EACH,
            close_choice: CANCEL_ALL,
            severity: Severity::Message,
        };

        let decision = self.ask(&request);
        info!(count = items.len(), choice = %request.choices[decision], "Batch decision");

        match decision {
            EXECUTE_ALL => vec![true; items.len()],
            REVIEW_EACH => {
                let mut approvals = Vec::with_capacity(items.len());
                for item in items {
                    let approved =
                        self.request_approval(&item.description, &item.preview, item.is_destructive);
                    approvals.push(approved);
                    if !approved {
                        approvals.resize(items.len(), false);
                        break;
                    }
                }
                approvals
            }
            _ => vec![false; items.len()],
        }
    }

    /// Ask the prompt, treating out-of-range answers as dismissal
    fn ask(&self, request: &PromptRequest) -> usize {
        let choice = self.prompt.ask(request);
        if choice < request.choices.len() {
            choice
        } else {
            request.close_choice
        }
    }
}
