//! Operator prompts answering approval requests

use std::collections::VecDeque;
use std::io::{BufRead, Write};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::HeadlessPolicy;

/// Visual weight of a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Message,
    Warning,
}

/// A blocking multiple-choice question for the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub title: String,
    pub message: String,
    pub help: Option<String>,
    pub choices: Vec<String>,
    /// Choice highlighted by default
    pub default_choice: usize,
    /// Choice reported when the prompt is dismissed
    pub close_choice: usize,
    pub severity: Severity,
}

/// Presents prompts to the operator and returns the chosen index
pub trait ApprovalPrompt: Send + Sync {
    fn ask(&self, request: &PromptRequest) -> usize;
}

// ==================== Headless ====================

/// Answers every prompt with a fixed policy
#[derive(Debug, Clone, Copy)]
pub struct HeadlessPrompt {
    policy: HeadlessPolicy,
}

impl HeadlessPrompt {
    pub fn new(policy: HeadlessPolicy) -> Self {
        Self { policy }
    }
}

impl Default for HeadlessPrompt {
    fn default() -> Self {
        Self::new(HeadlessPolicy::Deny)
    }
}

impl ApprovalPrompt for HeadlessPrompt {
    fn ask(&self, request: &PromptRequest) -> usize {
        let choice = match self.policy {
            HeadlessPolicy::Approve => 0,
            HeadlessPolicy::Deny => request.close_choice,
        };
        info!(
            title = %request.title,
            policy = ?self.policy,
            choice = request.choices.get(choice).map(String::as_str).unwrap_or("?"),
            "Headless approval"
        );
        choice
    }
}

// ==================== Scripted ====================

/// Replays queued answers and records every prompt it was shown.
///
/// Runs out of answers by dismissing the prompt.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<usize>>,
    shown: Mutex<Vec<PromptRequest>>,
}

impl ScriptedPrompt {
    pub fn new(answers: impl IntoIterator<Item = usize>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn push_answer(&self, answer: usize) {
        self.answers.lock().push_back(answer);
    }

    /// Prompts shown so far, oldest first
    pub fn prompts(&self) -> Vec<PromptRequest> {
        self.shown.lock().clone()
    }

    pub fn prompt_count(&self) -> usize {
        self.shown.lock().len()
    }

    pub fn remaining_answers(&self) -> usize {
        self.answers.lock().len()
    }
}

impl ApprovalPrompt for ScriptedPrompt {
    fn ask(&self, request: &PromptRequest) -> usize {
        self.shown.lock().push(request.clone());
        self.answers
            .lock()
            .pop_front()
            .unwrap_or(request.close_choice)
    }
}

// ==================== Console ====================

const MAX_CONSOLE_ATTEMPTS: usize = 3;

type ConsoleIo = (Box<dyn BufRead + Send>, Box<dyn Write + Send>);

/// Asks on a terminal. Accepts a 1-based number or a choice label; an empty
/// line picks the default.
pub struct ConsolePrompt {
    io: Mutex<ConsoleIo>,
}

impl ConsolePrompt {
    pub fn new(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            io: Mutex::new((Box::new(input), Box::new(output))),
        }
    }

    /// Prompt on stdin/stderr
    pub fn stdio() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()), std::io::stderr())
    }

    fn render(request: &PromptRequest, out: &mut dyn Write) -> std::io::Result<()> {
        let marker = match request.severity {
            Severity::Warning => "!!",
            Severity::Message => "--",
        };
        writeln!(out)?;
        writeln!(out, "{} {} {}", marker, request.title, marker)?;
        writeln!(out, "{}", request.message)?;
        if let Some(help) = &request.help {
            writeln!(out, "({})", help)?;
        }
        for (i, choice) in request.choices.iter().enumerate() {
            let default = if i == request.default_choice { " [default]" } else { "" };
            writeln!(out, "  {}) {}{}", i + 1, choice, default)?;
        }
        write!(out, "> ")?;
        out.flush()
    }

    fn parse(request: &PromptRequest, line: &str) -> Option<usize> {
        let answer = line.trim();
        if answer.is_empty() {
            return Some(request.default_choice);
        }
        if let Ok(n) = answer.parse::<usize>() {
            return (1..=request.choices.len()).contains(&n).then(|| n - 1);
        }
        request
            .choices
            .iter()
            .position(|choice| choice.eq_ignore_ascii_case(answer))
    }
}

impl ApprovalPrompt for ConsolePrompt {
    fn ask(&self, request: &PromptRequest) -> usize {
        let mut io = self.io.lock();
        let (input, output) = &mut *io;

        for _ in 0..MAX_CONSOLE_ATTEMPTS {
            if let Err(e) = Self::render(request, output.as_mut()) {
                warn!(error = %e, "Failed to write approval prompt");
                return request.close_choice;
            }

            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) => return request.close_choice,
                Ok(_) => {
                    if let Some(choice) = Self::parse(request, &line) {
                        return choice;
                    }
                    let _ = writeln!(output, "Unrecognised answer: {}", line.trim());
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read approval answer");
                    return request.close_choice;
                }
            }
        }

        request.close_choice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    fn request() -> PromptRequest {
        PromptRequest {
            title: "Approval Required".into(),
            message: "Do it?".into(),
            help: Some("Review carefully.".into()),
            choices: vec!["Execute".into(), "Cancel".into()],
            default_choice: 1,
            close_choice: 1,
            severity: Severity::Warning,
        }
    }

    /// Writer that can be inspected after the prompt took ownership
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_headless_policies() {
        assert_eq!(HeadlessPrompt::new(HeadlessPolicy::Approve).ask(&request()), 0);
        assert_eq!(HeadlessPrompt::new(HeadlessPolicy::Deny).ask(&request()), 1);
        assert_eq!(HeadlessPrompt::default().ask(&request()), 1);
    }

    #[test]
    fn test_scripted_replays_then_dismisses() {
        let prompt = ScriptedPrompt::new([0]);
        assert_eq!(prompt.ask(&request()), 0);
        assert_eq!(prompt.ask(&request()), 1);
        assert_eq!(prompt.prompt_count(), 2);
        assert_eq!(prompt.prompts()[0].title, "Approval Required");

        prompt.push_answer(0);
        assert_eq!(prompt.remaining_answers(), 1);
    }

    #[test]
    fn test_console_number_answer() {
        let out = SharedBuf::default();
        let prompt = ConsolePrompt::new(Cursor::new(b"1\n".to_vec()), out.clone());
        assert_eq!(prompt.ask(&request()), 0);

        let text = String::from_utf8(out.0.lock().clone()).unwrap();
        assert!(text.contains("!! Approval Required !!"));
        assert!(text.contains("1) Execute"));
        assert!(text.contains("2) Cancel [default]"));
        assert!(text.contains("(Review carefully.)"));
    }

    #[test]
    fn test_console_label_and_default() {
        let prompt = ConsolePrompt::new(Cursor::new(b"execute\n".to_vec()), std::io::sink());
        assert_eq!(prompt.ask(&request()), 0);

        let prompt = ConsolePrompt::new(Cursor::new(b"\n".to_vec()), std::io::sink());
        assert_eq!(prompt.ask(&request()), 1);
    }

    #[test]
    fn test_console_retries_then_gives_up() {
        let prompt = ConsolePrompt::new(Cursor::new(b"7\nmaybe\n2\n".to_vec()), std::io::sink());
        assert_eq!(prompt.ask(&request()), 1);

        let prompt = ConsolePrompt::new(Cursor::new(b"x\ny\nz\n1\n".to_vec()), std::io::sink());
        assert_eq!(prompt.ask(&request()), 1);
    }

    #[test]
    fn test_console_eof_dismisses() {
        let prompt = ConsolePrompt::new(Cursor::new(Vec::new()), std::io::sink());
        assert_eq!(prompt.ask(&request()), 1);
    }
}
