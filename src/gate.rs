//! Call sites for the throttled site actions.
//!
//! Both actions follow the same protocol: ask the limiter first; when it
//! refuses, tell the user how long to wait and skip the action; when it
//! permits, perform the action whatever its own outcome turns out to be.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::LimitsConfig;
use crate::error::{Result, ThrottleError};
use crate::ratelimit::{Clock, RequestRateLimiter};
use crate::store::KeyValueStore;

/// The actions the site throttles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrottledAction {
    /// Sending the registration confirmation email
    RegistrationEmail,
    /// Sending a message to the AI chat
    ChatMessage,
}

impl ThrottledAction {
    /// Message shown to the user when the action is throttled.
    pub fn retry_message(&self, seconds: u64) -> String {
        match self {
            ThrottledAction::RegistrationEmail => {
                format!("Please wait {}s before registering again", seconds)
            }
            ThrottledAction::ChatMessage => format!("Rate limit: wait {}s", seconds),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ThrottledAction::RegistrationEmail => "email",
            ThrottledAction::ChatMessage => "chat",
        }
    }
}

impl fmt::Display for ThrottledAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What happened at a gated call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome<T> {
    /// The limiter permitted the action and it ran.
    Performed(T),
    /// The limiter refused; nothing ran.
    Throttled {
        action: ThrottledAction,
        retry_after_secs: u64,
    },
}

impl<T> GateOutcome<T> {
    pub fn is_performed(&self) -> bool {
        matches!(self, GateOutcome::Performed(_))
    }

    /// The user-facing retry message, if throttled.
    pub fn retry_message(&self) -> Option<String> {
        match self {
            GateOutcome::Performed(_) => None,
            GateOutcome::Throttled {
                action,
                retry_after_secs,
            } => Some(action.retry_message(*retry_after_secs)),
        }
    }
}

/// Run `perform` only if `limiter` grants a slot.
pub fn gate<T, F>(limiter: &RequestRateLimiter, action: ThrottledAction, perform: F) -> GateOutcome<T>
where
    F: FnOnce() -> T,
{
    if !limiter.try_acquire() {
        let retry_after_secs = limiter.seconds_until_next_slot();
        debug!(
            action = %action,
            retry_after_secs = retry_after_secs,
            "Action throttled"
        );
        return GateOutcome::Throttled {
            action,
            retry_after_secs,
        };
    }

    GateOutcome::Performed(perform())
}

/// The two limiters of the site, built once and passed to the call sites.
#[derive(Debug)]
pub struct Throttles {
    email: RequestRateLimiter,
    chat: RequestRateLimiter,
}

impl Throttles {
    /// Build both limiters over one shared store.
    pub fn new(
        limits: &LimitsConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if limits.email.key == limits.chat.key {
            return Err(ThrottleError::Config(format!(
                "email and chat limiters must not share key '{}'",
                limits.email.key
            )));
        }

        let email = RequestRateLimiter::new(limits.email.clone(), store.clone(), clock.clone())?;
        let chat = RequestRateLimiter::new(limits.chat.clone(), store, clock)?;

        info!(
            email_capacity = email.capacity(),
            email_window_ms = email.window().as_millis() as u64,
            chat_capacity = chat.capacity(),
            chat_window_ms = chat.window().as_millis() as u64,
            "Throttles initialized"
        );

        Ok(Self { email, chat })
    }

    pub fn email(&self) -> &RequestRateLimiter {
        &self.email
    }

    pub fn chat(&self) -> &RequestRateLimiter {
        &self.chat
    }

    pub fn for_action(&self, action: ThrottledAction) -> &RequestRateLimiter {
        match action {
            ThrottledAction::RegistrationEmail => &self.email,
            ThrottledAction::ChatMessage => &self.chat,
        }
    }

    /// Gate `perform` behind the limiter for `action`.
    pub fn run<T, F>(&self, action: ThrottledAction, perform: F) -> GateOutcome<T>
    where
        F: FnOnce() -> T,
    {
        gate(self.for_action(action), action, perform)
    }
}
