//! Camera authorization.
//!
//! The controller never opens a device before the host grants camera access.
//! `Authorizer` abstracts where that decision comes from; `PermissionTask`
//! drives the request as a cooperative task so that waiting on a prompt never
//! blocks the refresh loop.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use anyhow::{anyhow, Result};

use crate::task::TaskState;

/// Source of the camera authorization decision.
pub trait Authorizer {
    /// Returns true when camera access is currently granted.
    fn has_authorization(&self) -> bool;

    /// Ask the user for access. The answer arrives asynchronously.
    fn request_authorization(&mut self);

    /// True while a request is outstanding.
    fn is_pending(&mut self) -> bool;
}

/// How `previewd` obtains camera access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorizationMode {
    Granted,
    Denied,
    Prompt,
}

impl AuthorizationMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            "prompt" => Ok(Self::Prompt),
            other => Err(anyhow!(
                "unknown authorization mode '{}' (expected granted, denied or prompt)",
                other
            )),
        }
    }

    pub fn into_authorizer(self) -> Box<dyn Authorizer> {
        match self {
            Self::Granted => Box::new(StaticAuthorizer::granted()),
            Self::Denied => Box::new(StaticAuthorizer::denied()),
            Self::Prompt => Box::new(PromptAuthorizer::new()),
        }
    }
}

/// Fixed answer; requests resolve immediately.
#[derive(Clone, Copy, Debug)]
pub struct StaticAuthorizer {
    granted: bool,
}

impl StaticAuthorizer {
    pub fn granted() -> Self {
        Self { granted: true }
    }

    pub fn denied() -> Self {
        Self { granted: false }
    }
}

impl Authorizer for StaticAuthorizer {
    fn has_authorization(&self) -> bool {
        self.granted
    }

    fn request_authorization(&mut self) {}

    fn is_pending(&mut self) -> bool {
        false
    }
}

/// Asks on the terminal. The blocking read runs on a helper thread.
pub struct PromptAuthorizer {
    granted: bool,
    answer: Option<Receiver<bool>>,
}

impl PromptAuthorizer {
    pub fn new() -> Self {
        Self {
            granted: false,
            answer: None,
        }
    }
}

impl Default for PromptAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Authorizer for PromptAuthorizer {
    fn has_authorization(&self) -> bool {
        self.granted
    }

    fn request_authorization(&mut self) {
        if self.answer.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            eprint!("Allow camera access? [y/N] ");
            let mut line = String::new();
            let granted = std::io::stdin().lock().read_line(&mut line).is_ok()
                && matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes");
            let _ = tx.send(granted);
        });
        self.answer = Some(rx);
    }

    fn is_pending(&mut self) -> bool {
        let Some(rx) = &self.answer else {
            return false;
        };
        match rx.try_recv() {
            Ok(granted) => {
                self.granted = granted;
                self.answer = None;
                false
            }
            Err(TryRecvError::Empty) => true,
            Err(TryRecvError::Disconnected) => {
                self.answer = None;
                false
            }
        }
    }
}

/// Drives authorization: check, request if needed, wait, re-check.
#[derive(Debug, Default)]
pub struct PermissionTask {
    state: TaskState,
}

impl PermissionTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Advance the task by one refresh.
    pub fn poll(&mut self, authorizer: &mut dyn Authorizer) -> TaskState {
        match self.state {
            TaskState::Pending => {
                if authorizer.has_authorization() {
                    self.state = TaskState::Succeeded;
                } else {
                    log::info!("requesting camera permission...");
                    authorizer.request_authorization();
                    self.state = TaskState::Awaiting;
                    // A request that resolves synchronously is settled right away.
                    return self.poll(authorizer);
                }
            }
            TaskState::Awaiting => {
                if !authorizer.is_pending() {
                    self.state = if authorizer.has_authorization() {
                        TaskState::Succeeded
                    } else {
                        log::error!("camera permission denied; cannot start camera stream");
                        TaskState::Failed
                    };
                }
            }
            TaskState::Succeeded | TaskState::Failed => {}
        }
        self.state
    }
}
