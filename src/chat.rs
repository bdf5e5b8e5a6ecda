//! The AI chat call site.
//!
//! A message is only sent when it has content, the chat is switched on and
//! the chat limiter grants a slot. Messages refused before the limiter never
//! use up a slot; a slot is kept even when the backend then fails.

use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::gate::{gate, GateOutcome, ThrottledAction};
use crate::ratelimit::RequestRateLimiter;

/// Reasons a message is refused before reaching the limiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("AI Chat is not configured")]
    NotConfigured,
}

/// What came back for a message that passed the limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatReply {
    Answered(String),
    /// The backend failed. The slot stays used.
    Failed { reason: String },
}

/// A chat front end bound to one backend switch.
#[derive(Debug, Clone, Copy)]
pub struct ChatSession {
    enabled: bool,
}

impl ChatSession {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Trim `text`, check it and the session, then pass it to `backend` behind `limiter`.
    pub fn send<B, E>(
        &self,
        limiter: &RequestRateLimiter,
        text: &str,
        backend: B,
    ) -> Result<GateOutcome<ChatReply>, ChatError>
    where
        B: FnOnce(&str) -> Result<String, E>,
        E: fmt::Display,
    {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if !self.enabled {
            debug!("Chat message dropped, chat is disabled");
            return Err(ChatError::NotConfigured);
        }

        Ok(gate(limiter, ThrottledAction::ChatMessage, || match backend(text) {
            Ok(answer) => ChatReply::Answered(answer),
            Err(e) => {
                warn!(error = %e, "Chat backend failed");
                ChatReply::Failed {
                    reason: e.to_string(),
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitConfig;
    use crate::ratelimit::ManualClock;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn chat_limiter(clock: &Arc<ManualClock>) -> RequestRateLimiter {
        RequestRateLimiter::new(
            LimitConfig::chat(),
            Arc::new(MemoryStore::new()),
            clock.clone(),
        )
        .unwrap()
    }

    fn echo(text: &str) -> Result<String, String> {
        Ok(format!("echo: {}", text))
    }

    #[test]
    fn test_send_trims_and_answers() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = chat_limiter(&clock);
        let session = ChatSession::new(true);

        let outcome = session.send(&limiter, "  hello  ", echo).unwrap();
        assert_eq!(
            outcome,
            GateOutcome::Performed(ChatReply::Answered("echo: hello".to_string()))
        );
        assert_eq!(limiter.recorded_count(), 1);
    }

    #[test]
    fn test_empty_message_uses_no_slot() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = chat_limiter(&clock);
        let session = ChatSession::new(true);
        let mut called = false;

        for text in ["", "   ", "\n\t"] {
            let result = session.send(&limiter, text, |t| {
                called = true;
                echo(t)
            });
            assert_eq!(result, Err(ChatError::EmptyMessage));
        }

        assert!(!called);
        assert_eq!(limiter.recorded_count(), 0);
    }

    #[test]
    fn test_disabled_session_uses_no_slot() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = chat_limiter(&clock);
        let session = ChatSession::new(false);

        assert_eq!(session.send(&limiter, "hi", echo), Err(ChatError::NotConfigured));
        assert_eq!(limiter.recorded_count(), 0);
        assert_eq!(ChatError::NotConfigured.to_string(), "AI Chat is not configured");
    }

    #[test]
    fn test_backend_failure_keeps_slot() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = chat_limiter(&clock);
        let session = ChatSession::new(true);

        let outcome = session
            .send(&limiter, "hi", |_| Err::<String, _>("upstream timeout"))
            .unwrap();
        assert_eq!(
            outcome,
            GateOutcome::Performed(ChatReply::Failed {
                reason: "upstream timeout".to_string()
            })
        );
        assert_eq!(limiter.recorded_count(), 1);
    }

    #[test]
    fn test_eleventh_message_is_throttled() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = chat_limiter(&clock);
        let session = ChatSession::new(true);

        for _ in 0..10 {
            assert!(session.send(&limiter, "hi", echo).unwrap().is_performed());
        }

        clock.set(15_000);
        let outcome = session.send(&limiter, "one more", echo).unwrap();
        assert_eq!(outcome.retry_message().as_deref(), Some("Rate limit: wait 45s"));
    }
}
