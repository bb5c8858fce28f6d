//! AI generation requests: validation, the "generating" flag and its
//! local timeout, and failure classification.
//!
//! Requests are fire-and-forget. The timeout only clears the flag; a result
//! arriving afterwards is still applied by the remote applier.

use std::time::{Duration, Instant};

use crate::image_prep::ImageError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("no image selected")]
    MissingImage,
    #[error("not joined to a diagram")]
    NotJoined,
    #[error("a generation is already running")]
    InProgress,
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Which kind of request is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Prompt,
    Image,
}

/// How a failed generation is presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationFailure {
    /// The upstream model is rate limited.
    RateLimited(String),
    Failed(String),
    TimedOut,
}

impl GenerationFailure {
    pub fn message(&self) -> String {
        match self {
            GenerationFailure::RateLimited(_) => {
                "The generation service is busy. Try again shortly.".to_string()
            }
            GenerationFailure::Failed(message) => message.clone(),
            GenerationFailure::TimedOut => "timeout".to_string(),
        }
    }
}

/// Classify a server error message.
pub fn classify_failure(message: &str) -> GenerationFailure {
    if message.contains("429") || message.contains("Resource exhausted") {
        GenerationFailure::RateLimited(message.to_string())
    } else {
        GenerationFailure::Failed(message.to_string())
    }
}

/// Trimmed prompt, or [`GenerationError::EmptyPrompt`].
pub fn validate_prompt(prompt: &str) -> Result<String, GenerationError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(GenerationError::EmptyPrompt);
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: RequestKind,
    deadline: Instant,
}

/// Tracks the outstanding generation request, if any.
#[derive(Debug)]
pub struct GenerationTracker {
    prompt_timeout: Duration,
    image_timeout: Duration,
    pending: Option<Pending>,
    last_failure: Option<GenerationFailure>,
    completed: u64,
}

impl GenerationTracker {
    pub fn new(prompt_timeout: Duration, image_timeout: Duration) -> Self {
        Self {
            prompt_timeout,
            image_timeout,
            pending: None,
            last_failure: None,
            completed: 0,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_kind(&self) -> Option<RequestKind> {
        self.pending.map(|p| p.kind)
    }

    pub fn last_failure(&self) -> Option<&GenerationFailure> {
        self.last_failure.as_ref()
    }

    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    fn timeout_for(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Prompt => self.prompt_timeout,
            RequestKind::Image => self.image_timeout,
        }
    }

    /// Start tracking a request we are about to send.
    pub fn begin(&mut self, kind: RequestKind, now: Instant) -> Result<(), GenerationError> {
        if self.pending.is_some() {
            return Err(GenerationError::InProgress);
        }
        self.pending = Some(Pending {
            kind,
            deadline: now + self.timeout_for(kind),
        });
        self.last_failure = None;
        Ok(())
    }

    /// Server acknowledged a generation. Also covers requests made by
    /// another client of the same diagram.
    pub fn started(&mut self, now: Instant) {
        if self.pending.is_none() {
            self.pending = Some(Pending {
                kind: RequestKind::Prompt,
                deadline: now + self.prompt_timeout,
            });
        }
        self.last_failure = None;
    }

    pub fn completed(&mut self) {
        self.pending = None;
        self.last_failure = None;
        self.completed += 1;
    }

    pub fn failed(&mut self, message: &str) -> &GenerationFailure {
        self.pending = None;
        self.last_failure.insert(classify_failure(message))
    }

    /// Expire the outstanding request if its deadline passed. Returns `true`
    /// when it just timed out.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(pending) if now >= pending.deadline => {
                log::warn!("Generation request timed out, results may still arrive");
                self.pending = None;
                self.last_failure = Some(GenerationFailure::TimedOut);
                true
            }
            _ => false,
        }
    }
}
