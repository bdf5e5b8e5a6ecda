//! Registered users, kept in the same store as the limiter logs.
//!
//! Each user lives under `cg_user_{id}` as a JSON record, and the id of the
//! signed-in user under `cg_current_user`. Passwords are validated but never
//! stored.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gate::{gate, GateOutcome, ThrottledAction};
use crate::ratelimit::{Clock, RequestRateLimiter};
use crate::store::{KeyValueStore, StoreError};

/// Key prefix of user records.
pub const USER_PREFIX: &str = "cg_user_";
/// Key holding the current user's id.
pub const CURRENT_USER_KEY: &str = "cg_current_user";

const MIN_PASSWORD_LEN: usize = 6;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0}")]
    Validation(String),
    #[error("registry storage failed: {0}")]
    Storage(#[from] StoreError),
    #[error("user record '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Raw registration input.
#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub name: String,
    pub surname: String,
    pub nickname: String,
    pub email: String,
    pub password: String,
}

impl RegistrationForm {
    /// Trim fields and strip the nickname down to `[A-Za-z0-9_]`.
    ///
    /// The password is left exactly as typed.
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            surname: self.surname.trim().to_string(),
            nickname: sanitize_nickname(self.nickname.trim()),
            email: self.email.trim().to_string(),
            password: self.password.clone(),
        }
    }

    /// Check the normalized form.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.name.is_empty() || self.email.is_empty() || self.password.is_empty() {
            return Err(RegistryError::Validation(
                "Please fill in all required fields".to_string(),
            ));
        }
        if !is_valid_email(&self.email) {
            return Err(RegistryError::Validation("Invalid email format".to_string()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(RegistryError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }
}

/// `local@domain.tld`: no whitespace, one `@`, and a dot inside the domain.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// Keep only ASCII letters, digits and underscores.
pub fn sanitize_nickname(nickname: &str) -> String {
    nickname
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// A stored user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub surname: String,
    pub nickname: String,
    pub email: String,
    pub registered_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

/// Result of a registration that got past the email limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Saved, and the notification went out.
    Notified(UserRecord),
    /// Saved, but the notification failed. The user stays registered.
    NotificationFailed { user: UserRecord, reason: String },
}

impl Registration {
    pub fn user(&self) -> &UserRecord {
        match self {
            Registration::Notified(user) => user,
            Registration::NotificationFailed { user, .. } => user,
        }
    }
}

/// User records over a shared store.
pub struct UserRegistry {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl UserRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Validate, pass the email limiter, save, then notify.
    ///
    /// A throttled registration saves nothing. A failing `notify` does not
    /// undo the saved record.
    pub fn register<F, E>(
        &self,
        limiter: &RequestRateLimiter,
        form: &RegistrationForm,
        notify: F,
    ) -> Result<GateOutcome<Registration>, RegistryError>
    where
        F: FnOnce(&UserRecord) -> Result<(), E>,
        E: fmt::Display,
    {
        let form = form.normalized();
        form.validate()?;

        let outcome = gate(limiter, ThrottledAction::RegistrationEmail, || {
            let user = self.save_user(&form)?;
            Ok::<_, RegistryError>(match notify(&user) {
                Ok(()) => Registration::Notified(user),
                Err(e) => {
                    warn!(user_id = %user.id, error = %e, "Registration notification failed");
                    Registration::NotificationFailed {
                        user,
                        reason: e.to_string(),
                    }
                }
            })
        });

        match outcome {
            GateOutcome::Performed(result) => result.map(GateOutcome::Performed),
            GateOutcome::Throttled {
                action,
                retry_after_secs,
            } => Ok(GateOutcome::Throttled {
                action,
                retry_after_secs,
            }),
        }
    }

    /// Store a new user from a validated form and make them current.
    pub fn save_user(&self, form: &RegistrationForm) -> Result<UserRecord, RegistryError> {
        let now = self.now();
        let id = format!(
            "{}_{}",
            now.timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..9]
        );

        let user = UserRecord {
            id,
            name: form.name.clone(),
            surname: form.surname.clone(),
            nickname: form.nickname.clone(),
            email: form.email.clone(),
            registered_at: now,
            last_login: now,
        };

        self.write(&user)?;
        self.store.set(CURRENT_USER_KEY, &user.id)?;

        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// The signed-in user, if any.
    pub fn current_user(&self) -> Result<Option<UserRecord>, RegistryError> {
        let Some(id) = self.store.get(CURRENT_USER_KEY)? else {
            return Ok(None);
        };
        self.read(&user_key(&id))
    }

    /// Stamp the current user's last login with the current time.
    pub fn update_last_login(&self) -> Result<Option<UserRecord>, RegistryError> {
        let Some(mut user) = self.current_user()? else {
            return Ok(None);
        };
        user.last_login = self.now();
        self.write(&user)?;

        debug!(user_id = %user.id, "Last login updated");
        Ok(Some(user))
    }

    /// Forget who is signed in. Records are kept.
    pub fn logout(&self) -> Result<(), RegistryError> {
        self.store.remove(CURRENT_USER_KEY)?;
        Ok(())
    }

    /// Every stored user. Records that fail to decode are skipped.
    pub fn all_users(&self) -> Result<Vec<UserRecord>, RegistryError> {
        let mut users = Vec::new();
        for key in self.store.keys()? {
            if !key.starts_with(USER_PREFIX) {
                continue;
            }
            match self.read(&key) {
                Ok(Some(user)) => users.push(user),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable user record"),
            }
        }
        users.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    fn read(&self, key: &str) -> Result<Option<UserRecord>, RegistryError> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RegistryError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn write(&self, user: &UserRecord) -> Result<(), RegistryError> {
        let key = user_key(&user.id);
        let encoded = serde_json::to_string(user).map_err(|e| RegistryError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.store.set(&key, &encoded)?;
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.clock.now_millis())
            .single()
            .unwrap_or_else(Utc::now)
    }
}

fn user_key(id: &str) -> String {
    format!("{}{}", USER_PREFIX, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitConfig;
    use crate::ratelimit::ManualClock;
    use crate::store::MemoryStore;

    fn form() -> RegistrationForm {
        RegistrationForm {
            name: " Ada ".to_string(),
            surname: "Lovelace".to_string(),
            nickname: "ada-l!_1".to_string(),
            email: "ada@example.com ".to_string(),
            password: "secret1".to_string(),
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, UserRegistry, RequestRateLimiter) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let registry = UserRegistry::new(store.clone(), clock.clone());
        let limiter =
            RequestRateLimiter::new(LimitConfig::email(), store.clone(), clock.clone()).unwrap();
        (store, clock, registry, limiter)
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last@sub.example.org"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a@.com"));
        assert!(!is_valid_email("a@com."));
        assert!(!is_valid_email("a b@example.com"));
        assert!(!is_valid_email("a@b@example.com"));
    }

    #[test]
    fn test_nickname_sanitized() {
        assert_eq!(sanitize_nickname("ada-l!_1"), "adal_1");
        assert_eq!(sanitize_nickname("Ünïcode"), "ncode");
    }

    #[test]
    fn test_form_validation() {
        assert!(form().normalized().validate().is_ok());

        let mut missing = form();
        missing.name = "   ".to_string();
        assert!(matches!(
            missing.normalized().validate(),
            Err(RegistryError::Validation(_))
        ));

        let mut short = form();
        short.password = "12345".to_string();
        let err = short.normalized().validate().unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 6 characters");

        let mut bad_email = form();
        bad_email.email = "nope".to_string();
        let err = bad_email.normalized().validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid email format");
    }

    #[test]
    fn test_save_and_current_user() {
        let (store, _clock, registry, _limiter) = setup();
        assert_eq!(registry.current_user().unwrap(), None);

        let user = registry.save_user(&form().normalized()).unwrap();
        assert_eq!(user.name, "Ada");
        assert_eq!(user.nickname, "adal_1");
        assert_eq!(user.email, "ada@example.com");
        assert!(user.id.starts_with("1700000000000_"));

        assert_eq!(registry.current_user().unwrap(), Some(user.clone()));

        let raw = store.get(&format!("cg_user_{}", user.id)).unwrap().unwrap();
        assert!(raw.contains("\"registeredAt\""));
        assert!(!raw.contains("secret1"));
    }

    #[test]
    fn test_update_last_login_and_logout() {
        let (_store, clock, registry, _limiter) = setup();
        assert_eq!(registry.update_last_login().unwrap(), None);

        let user = registry.save_user(&form().normalized()).unwrap();
        clock.advance(60_000);

        let updated = registry.update_last_login().unwrap().unwrap();
        assert_eq!(updated.registered_at, user.registered_at);
        assert_eq!(
            updated.last_login.timestamp_millis(),
            user.last_login.timestamp_millis() + 60_000
        );

        registry.logout().unwrap();
        assert_eq!(registry.current_user().unwrap(), None);
        assert_eq!(registry.all_users().unwrap().len(), 1);
    }

    #[test]
    fn test_all_users_skips_corrupt_records() {
        let (store, clock, registry, _limiter) = setup();
        registry.save_user(&form().normalized()).unwrap();
        clock.advance(1);
        registry.save_user(&form().normalized()).unwrap();
        store.set("cg_user_broken", "{").unwrap();
        store.set("cg_ai_rate_limit", "[1]").unwrap();

        let users = registry.all_users().unwrap();
        assert_eq!(users.len(), 2);
        assert!(users[0].registered_at < users[1].registered_at);
    }

    #[test]
    fn test_register_notifies() {
        let (_store, _clock, registry, limiter) = setup();

        let outcome = registry
            .register(&limiter, &form(), |_| Ok::<(), String>(()))
            .unwrap();
        match outcome {
            GateOutcome::Performed(Registration::Notified(user)) => assert_eq!(user.name, "Ada"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(limiter.recorded_count(), 1);
    }

    #[test]
    fn test_register_keeps_user_when_notification_fails() {
        let (_store, _clock, registry, limiter) = setup();

        let outcome = registry
            .register(&limiter, &form(), |_| Err("mail service down"))
            .unwrap();
        let GateOutcome::Performed(registration) = outcome else {
            panic!("registration should not be throttled");
        };
        assert!(matches!(
            registration,
            Registration::NotificationFailed { ref reason, .. } if reason == "mail service down"
        ));
        assert_eq!(registry.current_user().unwrap().as_ref(), Some(registration.user()));
    }

    #[test]
    fn test_register_throttled_after_three() {
        let (_store, _clock, registry, limiter) = setup();

        for _ in 0..3 {
            let outcome = registry
                .register(&limiter, &form(), |_| Ok::<(), String>(()))
                .unwrap();
            assert!(outcome.is_performed());
        }

        let mut notified = false;
        let outcome = registry
            .register(&limiter, &form(), |_| {
                notified = true;
                Ok::<(), String>(())
            })
            .unwrap();
        assert_eq!(
            outcome.retry_message().as_deref(),
            Some("Please wait 300s before registering again")
        );
        assert!(!notified);
        assert_eq!(registry.all_users().unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_form_does_not_consume_slot() {
        let (_store, _clock, registry, limiter) = setup();
        let mut bad = form();
        bad.password = "123".to_string();

        let result = registry.register(&limiter, &bad, |_| Ok::<(), String>(()));
        assert!(matches!(result, Err(RegistryError::Validation(_))));
        assert_eq!(limiter.recorded_count(), 0);
    }
}
