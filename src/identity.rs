//! Anonymous voter identity.
//!
//! A voter is reduced to a per-show hash so repeat ballots can be refused
//! without ever storing an address. Voters behind one shared network address
//! (festival WiFi, carrier NAT) collapse into a single identity under
//! [`NetworkFingerprint`]; that under-count is accepted. [`SessionFingerprint`]
//! separates them when the widget sends back a session token this server
//! signed and that has not yet expired. Any other token is ignored.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Duration;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Result, VotingError};

type HmacSha256 = Hmac<Sha256>;

/// How long a widget session token is honoured: six hours.
pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 6 * 60 * 60;

/// What the host knows about the request that carries a ballot.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub remote_addr: IpAddr,
    /// Token issued to the widget at load, if the client sent it back.
    pub session_token: Option<String>,
}

impl RequestContext {
    pub fn new(remote_addr: IpAddr) -> Self {
        Self {
            remote_addr,
            session_token: None,
        }
    }

    pub fn with_session(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityToken(String);

impl IdentityToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait IdentityStrategy: Send + Sync {
    fn identify(&self, show_slug: &str, request: &RequestContext) -> IdentityToken;

    /// Token handed to the widget at load. Recorded with each ballot.
    fn issue_session_token(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

fn digest(parts: &[&[u8]]) -> IdentityToken {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(*part);
    }
    IdentityToken(format!("{:x}", hasher.finalize()))
}

/// Hashes the remote address with a server secret and the show slug.
pub struct NetworkFingerprint {
    secret: String,
}

impl NetworkFingerprint {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

impl IdentityStrategy for NetworkFingerprint {
    fn identify(&self, show_slug: &str, request: &RequestContext) -> IdentityToken {
        let addr = request.remote_addr.to_string();
        digest(&[self.secret.as_bytes(), show_slug.as_bytes(), addr.as_bytes()])
    }
}

/// Signs and checks widget session tokens of the form
/// `<uuid>.<issued unix seconds>.<base64 HMAC-SHA256>`.
pub struct SessionTokens {
    mac: HmacSha256,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionTokens {
    pub fn new(secret: &str, ttl_seconds: i64, clock: Arc<dyn Clock>) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| VotingError::InvalidInput(format!("unusable session signing key: {}", e)))?;
        let ttl = Duration::try_seconds(ttl_seconds)
            .filter(|ttl| *ttl > Duration::zero())
            .ok_or_else(|| {
                VotingError::InvalidInput(format!("session token lifetime must be positive, got {}", ttl_seconds))
            })?;
        Ok(Self { mac, ttl, clock })
    }

    pub fn issue(&self) -> String {
        let payload = format!("{}.{}", Uuid::new_v4(), self.clock.now().timestamp());
        let signature = URL_SAFE_NO_PAD.encode(self.sign(&payload).finalize().into_bytes());
        format!("{}.{}", payload, signature)
    }

    /// True only for a token signed with this key and issued within the lifetime.
    pub fn verify(&self, token: &str) -> bool {
        let Some((payload, signature)) = token.rsplit_once('.') else {
            return false;
        };
        let Some((id, issued)) = payload.split_once('.') else {
            return false;
        };
        if Uuid::parse_str(id).is_err() {
            return false;
        }
        let Ok(issued) = issued.parse::<i64>() else {
            return false;
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        if self.sign(payload).verify_slice(&signature).is_err() {
            return false;
        }

        let age = self.clock.now().timestamp().saturating_sub(issued);
        (0..self.ttl.num_seconds()).contains(&age)
    }

    fn sign(&self, payload: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac
    }
}

/// Network fingerprint plus the widget session token when it verifies.
pub struct SessionFingerprint {
    network: NetworkFingerprint,
    tokens: SessionTokens,
}

impl SessionFingerprint {
    pub fn new(secret: impl Into<String>, ttl_seconds: i64, clock: Arc<dyn Clock>) -> Result<Self> {
        let secret = secret.into();
        Ok(Self {
            tokens: SessionTokens::new(&secret, ttl_seconds, clock)?,
            network: NetworkFingerprint::new(secret),
        })
    }
}

impl IdentityStrategy for SessionFingerprint {
    fn identify(&self, show_slug: &str, request: &RequestContext) -> IdentityToken {
        match request.session_token.as_deref() {
            Some(session) if self.tokens.verify(session) => {
                let addr = request.remote_addr.to_string();
                digest(&[
                    self.network.secret.as_bytes(),
                    show_slug.as_bytes(),
                    addr.as_bytes(),
                    session.as_bytes(),
                ])
            }
            _ => self.network.identify(show_slug, request),
        }
    }

    fn issue_session_token(&self) -> String {
        self.tokens.issue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn request(addr: &str) -> RequestContext {
        RequestContext::new(addr.parse().unwrap())
    }

    fn session_guard() -> (SessionFingerprint, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let guard = SessionFingerprint::new("s3cret", 600, clock.clone()).unwrap();
        (guard, clock)
    }

    #[test]
    fn same_voter_same_show_is_stable() {
        let guard = NetworkFingerprint::new("s3cret");
        let a = guard.identify("jazz-night", &request("203.0.113.9"));
        let b = guard.identify("jazz-night", &request("203.0.113.9"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(!a.as_str().contains("203.0.113.9"));
    }

    #[test]
    fn tokens_do_not_correlate_across_shows_or_secrets() {
        let guard = NetworkFingerprint::new("s3cret");
        let jazz = guard.identify("jazz-night", &request("203.0.113.9"));
        let folk = guard.identify("folk-night", &request("203.0.113.9"));
        assert_ne!(jazz, folk);

        let other = NetworkFingerprint::new("different").identify("jazz-night", &request("203.0.113.9"));
        assert_ne!(jazz, other);
    }

    #[test]
    fn shared_network_collapses_without_session() {
        let (guard, _clock) = session_guard();
        let phone = guard.identify("jazz-night", &request("198.51.100.1"));
        let laptop = guard.identify("jazz-night", &request("198.51.100.1"));
        assert_eq!(phone, laptop);
        assert_eq!(
            phone,
            NetworkFingerprint::new("s3cret").identify("jazz-night", &request("198.51.100.1"))
        );
    }

    #[test]
    fn issued_session_separates_voters_on_shared_network() {
        let (guard, _clock) = session_guard();
        let phone = guard.identify(
            "jazz-night",
            &request("198.51.100.1").with_session(guard.issue_session_token()),
        );
        let laptop = guard.identify(
            "jazz-night",
            &request("198.51.100.1").with_session(guard.issue_session_token()),
        );
        assert_ne!(phone, laptop);
    }

    #[test]
    fn invented_or_foreign_tokens_collapse_to_network() {
        let (guard, clock) = session_guard();
        let network = guard.identify("jazz-night", &request("198.51.100.1"));

        let stranger = SessionFingerprint::new("someone-else", 600, clock).unwrap();
        let issued = guard.issue_session_token();
        let (payload, _) = issued.rsplit_once('.').unwrap();
        let tampered = format!("{}0.AAAA", payload);

        for forged in [
            "".to_string(),
            "made-up-0".to_string(),
            format!("{}.{}", Uuid::new_v4(), 0),
            stranger.issue_session_token(),
            tampered,
        ] {
            assert_eq!(
                guard.identify("jazz-night", &request("198.51.100.1").with_session(forged.clone())),
                network,
                "token {:?} should not be honoured",
                forged
            );
        }
    }

    #[test]
    fn expired_token_collapses_to_network() {
        let (guard, clock) = session_guard();
        let token = guard.issue_session_token();
        let network = guard.identify("jazz-night", &request("198.51.100.1"));

        clock.advance(599);
        assert_ne!(
            guard.identify("jazz-night", &request("198.51.100.1").with_session(token.clone())),
            network
        );
        clock.advance(1);
        assert_eq!(
            guard.identify("jazz-night", &request("198.51.100.1").with_session(token)),
            network
        );
    }

    #[test]
    fn lifetime_must_be_positive() {
        let clock = Arc::new(ManualClock::new());
        assert!(SessionFingerprint::new("s3cret", 0, clock.clone()).is_err());
        assert!(SessionFingerprint::new("s3cret", -60, clock).is_err());
    }
}
