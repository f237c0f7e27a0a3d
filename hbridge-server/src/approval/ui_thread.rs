//! Marshalling prompts onto the UI-owning thread
//!
//! The host's UI may only be touched from one thread, while approvals are
//! requested from bridge worker threads. [`ui_prompt`] splits a prompt into a
//! [`UiPromptHandle`], callable from anywhere, and a [`UiPromptPump`] that the
//! UI thread drives from its event loop.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use tracing::{trace, warn};

use super::prompt::{ApprovalPrompt, PromptRequest};

struct PromptJob {
    request: PromptRequest,
    reply: Sender<usize>,
}

/// Cross-thread side of a UI prompt
pub struct UiPromptHandle {
    jobs: Sender<PromptJob>,
    ui_thread: ThreadId,
    inner: Arc<dyn ApprovalPrompt>,
}

/// UI-thread side of a UI prompt
pub struct UiPromptPump {
    jobs: Receiver<PromptJob>,
    inner: Arc<dyn ApprovalPrompt>,
}

/// Bind `inner` to the calling thread, which becomes the UI thread
pub fn ui_prompt(inner: Arc<dyn ApprovalPrompt>) -> (UiPromptHandle, UiPromptPump) {
    let (tx, rx) = mpsc::channel();
    let handle = UiPromptHandle {
        jobs: tx,
        ui_thread: thread::current().id(),
        inner: Arc::clone(&inner),
    };
    let pump = UiPromptPump { jobs: rx, inner };
    (handle, pump)
}

impl ApprovalPrompt for UiPromptHandle {
    fn ask(&self, request: &PromptRequest) -> usize {
        if thread::current().id() == self.ui_thread {
            return self.inner.ask(request);
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        let job = PromptJob {
            request: request.clone(),
            reply: reply_tx,
        };
        if self.jobs.send(job).is_err() {
            warn!(title = %request.title, "UI thread is gone, dismissing prompt");
            return request.close_choice;
        }

        // A pump dropped mid-prompt drops the reply sender
        reply_rx.recv().unwrap_or(request.close_choice)
    }
}

impl UiPromptPump {
    fn answer(&self, job: PromptJob) {
        trace!(title = %job.request.title, "Answering prompt on UI thread");
        let choice = self.inner.ask(&job.request);
        // The requester may have given up; nothing to do then
        let _ = job.reply.send(choice);
    }

    /// Answer everything already queued. Returns how many prompts ran.
    pub fn run_pending(&self) -> usize {
        let mut answered = 0;
        while let Ok(job) = self.jobs.try_recv() {
            self.answer(job);
            answered += 1;
        }
        answered
    }

    /// Answer prompts as they arrive until `should_stop` returns true, checking
    /// it at least every `poll`. Also returns once every handle is dropped.
    pub fn run_until(&self, should_stop: impl Fn() -> bool, poll: Duration) {
        while !should_stop() {
            match self.jobs.recv_timeout(poll) {
                Ok(job) => self.answer(job),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Answer prompts until every handle is dropped
    pub fn run(&self) {
        while let Ok(job) = self.jobs.recv() {
            self.answer(job);
        }
    }
}
