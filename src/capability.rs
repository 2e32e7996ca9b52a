//! Signed file capabilities.
//!
//! A capability is an HS256 JWT naming one file and its owner, valid until
//! `exp`. Nothing is persisted: verification is a signature and expiry check.
//! There is no revocation; a deny-list keyed by token id could be added later.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{Result, StowageError};

/// Shortest allowed lifetime.
pub const MIN_TTL_SECS: u64 = 60;
/// Longest allowed lifetime.
pub const MAX_TTL_SECS: u64 = 86_400;
/// Lifetime used when the caller does not ask for one.
pub const DEFAULT_TTL_SECS: u64 = 3_600;

const PURPOSE: &str = "file";

/// Claims carried by a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityClaims {
    /// Subject file ID.
    pub sub: String,
    /// Owner of the file at issue time.
    pub own: String,
    /// Issued at (Unix seconds).
    pub iat: i64,
    /// Expiry (Unix seconds).
    pub exp: i64,
    /// Token purpose, always `file`.
    pub purpose: String,
}

/// A freshly minted capability.
#[derive(Debug, Clone)]
pub struct SignedCapability {
    /// Encoded token.
    pub token: String,
    /// Subject file ID.
    pub file_id: String,
    /// Owner ID.
    pub owner_id: String,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
    /// Effective lifetime after clamping.
    pub ttl_seconds: u64,
}

/// Mints and verifies capabilities with one secret.
#[derive(Clone)]
pub struct CapabilityIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl CapabilityIssuer {
    /// Create an issuer from a secret.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked in verify_at against an explicit clock, with no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Clamp a requested lifetime into `[MIN_TTL_SECS, MAX_TTL_SECS]`.
    pub fn clamp_ttl(ttl_seconds: u64) -> u64 {
        ttl_seconds.clamp(MIN_TTL_SECS, MAX_TTL_SECS)
    }

    /// Mint a capability valid from `now` for the clamped lifetime.
    ///
    /// Ownership must already have been checked by the caller.
    pub fn mint(
        &self,
        file_id: &str,
        owner_id: &str,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<SignedCapability> {
        let ttl_seconds = Self::clamp_ttl(ttl_seconds);
        let iat = now.timestamp();
        let exp = iat + ttl_seconds as i64;
        let claims = CapabilityClaims {
            sub: file_id.to_string(),
            own: owner_id.to_string(),
            iat,
            exp,
            purpose: PURPOSE.to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| StowageError::Authorization(format!("failed to sign capability: {e}")))?;
        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| StowageError::Validation("capability expiry out of range".to_string()))?;

        Ok(SignedCapability {
            token,
            file_id: file_id.to_string(),
            owner_id: owner_id.to_string(),
            expires_at,
            ttl_seconds,
        })
    }

    /// Verify a token against the wall clock.
    pub fn verify(&self, token: &str) -> Result<CapabilityClaims> {
        self.verify_at(token, Utc::now())
    }

    /// Verify a token as of `now`. Valid while `now < exp`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<CapabilityClaims> {
        let data = decode::<CapabilityClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!("Capability validation failed: {}", e);
                StowageError::Authorization("invalid capability".to_string())
            })?;
        let claims = data.claims;

        if claims.purpose != PURPOSE {
            return Err(StowageError::Authorization(
                "token is not a file capability".to_string(),
            ));
        }
        if now.timestamp() >= claims.exp {
            return Err(StowageError::Authorization("capability expired".to_string()));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn issuer() -> CapabilityIssuer {
        CapabilityIssuer::new("capability-secret")
    }

    #[test]
    fn test_clamp_ttl() {
        assert_eq!(CapabilityIssuer::clamp_ttl(0), MIN_TTL_SECS);
        assert_eq!(CapabilityIssuer::clamp_ttl(59), 60);
        assert_eq!(CapabilityIssuer::clamp_ttl(3600), 3600);
        assert_eq!(CapabilityIssuer::clamp_ttl(1_000_000), MAX_TTL_SECS);
    }

    #[test]
    fn test_mint_and_verify() {
        let now = Utc::now();
        let cap = issuer().mint("file-1", "alice", 600, now).unwrap();

        let claims = issuer().verify_at(&cap.token, now).unwrap();

        assert_eq!(claims.sub, "file-1");
        assert_eq!(claims.own, "alice");
        assert_eq!(claims.purpose, "file");
        assert_eq!(cap.ttl_seconds, 600);
        assert_eq!(cap.expires_at.timestamp(), now.timestamp() + 600);
    }

    #[test]
    fn test_sixty_second_capability_boundary() {
        let t = Utc::now();
        let cap = issuer().mint("file-1", "alice", 60, t).unwrap();

        assert!(issuer().verify_at(&cap.token, t + Duration::seconds(59)).is_ok());
        assert!(matches!(
            issuer().verify_at(&cap.token, t + Duration::seconds(61)),
            Err(StowageError::Authorization(_))
        ));
    }

    #[test]
    fn test_short_ttl_is_clamped_up() {
        let t = Utc::now();
        let cap = issuer().mint("file-1", "alice", 5, t).unwrap();

        assert_eq!(cap.ttl_seconds, 60);
        assert!(issuer().verify_at(&cap.token, t + Duration::seconds(30)).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let now = Utc::now();
        let cap = issuer().mint("file-1", "alice", 600, now).unwrap();

        let other = CapabilityIssuer::new("different-secret");

        assert!(matches!(
            other.verify_at(&cap.token, now),
            Err(StowageError::Authorization(_))
        ));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let now = Utc::now();
        let cap = issuer().mint("file-1", "alice", 600, now).unwrap();
        let mut tampered = cap.token.clone();
        tampered.push('x');

        assert!(issuer().verify_at(&tampered, now).is_err());
        assert!(issuer().verify("not-a-token").is_err());
    }
}
