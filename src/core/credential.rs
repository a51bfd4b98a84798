//! Signed connection credentials for the meeting provider.
//!
//! [`HmacCredentialIssuer`] produces an HS256 JSON web token per
//! `(meeting, role, duration)` and caches it until shortly before expiry.

use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::Sha256;

use crate::core::SchedulerError;
use crate::util::clock::now_secs;

type HmacSha256 = Hmac<Sha256>;

/// Tokens always outlive the hold-open by this margin.
const EXPIRY_MARGIN_SECS: u64 = 30 * 60;
/// Shortest token lifetime issued.
const MIN_LIFETIME_SECS: u64 = 2 * 60 * 60;
/// Cached tokens are reissued this long before they expire.
const REFRESH_SKEW_SECS: u64 = 5 * 60;

/// Participant role encoded in a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular attendee.
    Attendee,
    /// Meeting host.
    Host,
}

impl Role {
    const fn code(self) -> u8 {
        match self {
            Self::Attendee => 0,
            Self::Host => 1,
        }
    }
}

/// Issues signed connection credentials.
pub trait CredentialIssuer: Send + Sync {
    /// Sign a credential for `meeting_id` valid for at least `duration_minutes`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Credential` when signing fails.
    fn sign(&self, meeting_id: &str, role: Role, duration_minutes: u32) -> Result<String, SchedulerError>;
}

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

#[derive(Serialize)]
struct Claims<'a> {
    key: &'a str,
    mn: &'a str,
    role: u8,
    iat: u64,
    exp: u64,
    token_exp: u64,
}

struct CachedToken {
    token: String,
    expires_at: u64,
}

/// HMAC-SHA256 signer with a per-meeting cache.
pub struct HmacCredentialIssuer {
    key: String,
    secret: Vec<u8>,
    cache: Mutex<HashMap<(String, Role, u32), CachedToken>>,
}

impl HmacCredentialIssuer {
    /// Create an issuer for the given application key and secret.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Credential` for an empty key or secret.
    pub fn new(key: impl Into<String>, secret: impl AsRef<[u8]>) -> Result<Self, SchedulerError> {
        let key = key.into();
        let secret = secret.as_ref().to_vec();
        if key.is_empty() || secret.is_empty() {
            return Err(SchedulerError::Credential("key and secret are required".into()));
        }
        Ok(Self {
            key,
            secret,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Token lifetime for a hold-open of `duration_minutes`.
    #[must_use]
    pub fn lifetime_secs(duration_minutes: u32) -> u64 {
        (u64::from(duration_minutes) * 60 + EXPIRY_MARGIN_SECS).max(MIN_LIFETIME_SECS)
    }

    /// Build and sign a token issued at `iat`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Credential` if encoding or keying fails.
    pub fn issue_at(&self, meeting_id: &str, role: Role, duration_minutes: u32, iat: u64) -> Result<String, SchedulerError> {
        let exp = iat + Self::lifetime_secs(duration_minutes);
        let header = serde_json::to_vec(&Header { alg: "HS256", typ: "JWT" })
            .map_err(|e| SchedulerError::Credential(e.to_string()))?;
        let claims = serde_json::to_vec(&Claims {
            key: &self.key,
            mn: meeting_id,
            role: role.code(),
            iat,
            exp,
            token_exp: exp,
        })
        .map_err(|e| SchedulerError::Credential(e.to_string()))?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| SchedulerError::Credential(e.to_string()))?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Number of cached tokens.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

impl CredentialIssuer for HmacCredentialIssuer {
    fn sign(&self, meeting_id: &str, role: Role, duration_minutes: u32) -> Result<String, SchedulerError> {
        let now = now_secs();
        let key = (meeting_id.to_owned(), role, duration_minutes);
        let mut cache = self.cache.lock();
        cache.retain(|_, cached| cached.expires_at > now + REFRESH_SKEW_SECS);
        if let Some(cached) = cache.get(&key) {
            return Ok(cached.token.clone());
        }
        let token = self.issue_at(meeting_id, role, duration_minutes, now)?;
        cache.insert(
            key,
            CachedToken {
                token: token.clone(),
                expires_at: now + Self::lifetime_secs(duration_minutes),
            },
        );
        tracing::debug!(meeting_id, duration_minutes, "issued connection credential");
        Ok(token)
    }
}
