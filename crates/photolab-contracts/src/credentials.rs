use std::env;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::errors::EnhanceError;

/// Keys shorter than this are rejected before any request is made.
pub const MIN_CREDENTIAL_LEN: usize = 20;

pub const CREDENTIAL_ENV_KEYS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Absent,
    /// A structurally valid key is held but no request has succeeded with it.
    Unverified,
    /// A request with this key completed successfully.
    Verified,
}

impl CredentialState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Unverified => "unverified",
            Self::Verified => "verified",
        }
    }
}

/// Where a credential comes from. The slot never embeds a key of its own.
pub trait CredentialSource: Send + Sync {
    fn fetch(&self) -> Option<String>;
}

/// First non-empty value among a list of environment variables.
#[derive(Debug, Clone)]
pub struct EnvCredentialSource {
    keys: Vec<String>,
}

impl Default for EnvCredentialSource {
    fn default() -> Self {
        Self::new(CREDENTIAL_ENV_KEYS.iter().copied())
    }
}

impl EnvCredentialSource {
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            keys: keys.into_iter().map(str::to_string).collect(),
        }
    }
}

impl CredentialSource for EnvCredentialSource {
    fn fetch(&self) -> Option<String> {
        self.keys.iter().find_map(|key| {
            env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
    }
}

#[derive(Clone)]
pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl CredentialSource for StaticCredential {
    fn fetch(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

impl fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticCredential(<redacted>)")
    }
}

/// Structural check only: non-empty, no whitespace, minimum length.
pub fn validate_credential(raw: &str) -> Result<String, EnhanceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnhanceError::Configuration("API key is missing".to_string()));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(EnhanceError::Configuration(
            "API key contains whitespace".to_string(),
        ));
    }
    if trimmed.chars().count() < MIN_CREDENTIAL_LEN {
        return Err(EnhanceError::Configuration(format!(
            "API key is shorter than {MIN_CREDENTIAL_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug)]
struct SlotInner {
    key: Option<String>,
    state: CredentialState,
    rejected: Option<EnhanceError>,
}

/// Holds the session's credential and tracks how far it can be trusted.
///
/// A key only becomes `Verified` after a request with it succeeds; an
/// authentication failure empties the slot so the user is asked again.
pub struct CredentialSlot {
    inner: Mutex<SlotInner>,
}

impl Default for CredentialSlot {
    fn default() -> Self {
        Self::empty()
    }
}

impl CredentialSlot {
    pub fn empty() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                key: None,
                state: CredentialState::Absent,
                rejected: None,
            }),
        }
    }

    /// Loads from `source`. Invalid or missing values leave the slot absent;
    /// the rejection reason is kept for `key_for_request`.
    pub fn from_source(source: &dyn CredentialSource) -> Self {
        let slot = Self::empty();
        if let Some(raw) = source.fetch() {
            let _ = slot.replace(&raw);
        }
        slot
    }

    /// Installs a new key (re-selection). The previous key is discarded even
    /// when the new one is rejected.
    pub fn replace(&self, raw: &str) -> Result<(), EnhanceError> {
        let mut inner = self.lock();
        match validate_credential(raw) {
            Ok(key) => {
                inner.key = Some(key);
                inner.state = CredentialState::Unverified;
                inner.rejected = None;
                Ok(())
            }
            Err(err) => {
                inner.key = None;
                inner.state = CredentialState::Absent;
                inner.rejected = Some(err.clone());
                Err(err)
            }
        }
    }

    pub fn state(&self) -> CredentialState {
        self.lock().state
    }

    /// Key to attach to a request. Without one, the error names why the last
    /// key was rejected, or that none was ever supplied.
    pub fn key_for_request(&self) -> Result<String, EnhanceError> {
        let inner = self.lock();
        if let Some(key) = &inner.key {
            return Ok(key.clone());
        }
        Err(inner.rejected.clone().unwrap_or_else(|| {
            EnhanceError::Configuration(format!(
                "API key is missing; set one of {}",
                CREDENTIAL_ENV_KEYS.join(", ")
            ))
        }))
    }

    /// Marks the key verified, but only if `key` is still the one held.
    pub fn mark_verified(&self, key: &str) {
        let mut inner = self.lock();
        if inner.key.as_deref() == Some(key) {
            inner.state = CredentialState::Verified;
        }
    }

    /// Drops `key` after the service rejected it, unless it was already
    /// replaced.
    pub fn revoke(&self, key: &str) {
        let mut inner = self.lock();
        if inner.key.as_deref() == Some(key) {
            inner.key = None;
            inner.state = CredentialState::Absent;
            inner.rejected = None;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CredentialSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSlot")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "AIzaTestKey0123456789abcdef";
    const OTHER_KEY: &str = "AIzaOtherKey9876543210zyxwv";

    #[test]
    fn validation_rejects_blank_short_and_spaced_keys() {
        assert!(matches!(
            validate_credential("   "),
            Err(EnhanceError::Configuration(_))
        ));
        assert!(matches!(
            validate_credential("short"),
            Err(EnhanceError::Configuration(_))
        ));
        assert!(matches!(
            validate_credential("AIza with spaces 0123456789"),
            Err(EnhanceError::Configuration(_))
        ));
        assert_eq!(validate_credential(&format!("  {KEY}\n")), Ok(KEY.to_string()));
    }

    #[test]
    fn fresh_key_is_not_trusted_until_verified() {
        let slot = CredentialSlot::from_source(&StaticCredential::new(KEY));
        assert_eq!(slot.state(), CredentialState::Unverified);
        assert_eq!(slot.key_for_request(), Ok(KEY.to_string()));
        slot.mark_verified(KEY);
        assert_eq!(slot.state(), CredentialState::Verified);
    }

    #[test]
    fn invalid_source_leaves_slot_absent() {
        let slot = CredentialSlot::from_source(&StaticCredential::new("tiny"));
        assert_eq!(slot.state(), CredentialState::Absent);
        assert!(matches!(
            slot.key_for_request(),
            Err(EnhanceError::Configuration(_))
        ));
    }

    #[test]
    fn rejected_source_reports_the_validation_reason() {
        let slot = CredentialSlot::from_source(&StaticCredential::new("AIzaShort"));
        assert_eq!(slot.state(), CredentialState::Absent);
        match slot.key_for_request() {
            Err(EnhanceError::Configuration(message)) => {
                assert!(message.contains("shorter than 20"), "{message}");
                assert!(!message.contains("missing"), "{message}");
            }
            other => panic!("expected Configuration, got {other:?}"),
        }

        let spaced =
            CredentialSlot::from_source(&StaticCredential::new("AIza with spaces 0123456789"));
        assert!(matches!(
            spaced.key_for_request(),
            Err(EnhanceError::Configuration(message)) if message.contains("whitespace")
        ));
    }

    #[test]
    fn missing_key_message_returns_after_revoke() -> anyhow::Result<()> {
        let slot = CredentialSlot::empty();
        assert!(slot.replace("bad").is_err());
        slot.replace(KEY)?;
        slot.revoke(KEY);
        assert!(matches!(
            slot.key_for_request(),
            Err(EnhanceError::Configuration(message)) if message.contains("missing")
        ));
        Ok(())
    }

    #[test]
    fn revoke_only_applies_to_current_key() -> anyhow::Result<()> {
        let slot = CredentialSlot::from_source(&StaticCredential::new(KEY));
        slot.replace(OTHER_KEY)?;
        slot.revoke(KEY);
        assert_eq!(slot.state(), CredentialState::Unverified);
        slot.mark_verified(KEY);
        assert_eq!(slot.state(), CredentialState::Unverified);
        slot.revoke(OTHER_KEY);
        assert_eq!(slot.state(), CredentialState::Absent);
        Ok(())
    }

    #[test]
    fn rejected_replacement_clears_previous_key() {
        let slot = CredentialSlot::from_source(&StaticCredential::new(KEY));
        assert!(slot.replace("bad").is_err());
        assert_eq!(slot.state(), CredentialState::Absent);
    }

    #[test]
    fn env_source_takes_first_non_empty_key() {
        std::env::set_var("PHOTOLAB_TEST_EMPTY_KEY", "  ");
        std::env::set_var("PHOTOLAB_TEST_SET_KEY", KEY);
        let source = EnvCredentialSource::new([
            "PHOTOLAB_TEST_UNSET_KEY",
            "PHOTOLAB_TEST_EMPTY_KEY",
            "PHOTOLAB_TEST_SET_KEY",
        ]);
        assert_eq!(source.fetch(), Some(KEY.to_string()));
    }

    #[test]
    fn debug_output_redacts_keys() {
        let slot = CredentialSlot::from_source(&StaticCredential::new(KEY));
        assert!(!format!("{slot:?}").contains(KEY));
        assert!(!format!("{:?}", StaticCredential::new(KEY)).contains(KEY));
    }
}
