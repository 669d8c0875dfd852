//! services/api/src/web/session.rs
//!
//! Session credentials: HS256 JWTs carrying the caller's user id and role,
//! checked on every request for signature, expiry, issuer and audience.

use chrono::{DateTime, Duration, Utc};
use ebook_hub_core::{AuthFailure, Identity, LibraryError, LibraryResult, Role};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    role: Role,
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// A freshly minted session credential.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl SessionSigner {
    pub fn new(secret: &str, issuer: &str, audience: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            ttl,
        }
    }

    pub fn issue(&self, identity: &Identity) -> LibraryResult<IssuedSession> {
        self.issue_at(identity, Utc::now())
    }

    fn issue_at(&self, identity: &Identity, now: DateTime<Utc>) -> LibraryResult<IssuedSession> {
        let expires_at = now + self.ttl;
        let claims = SessionClaims {
            sub: identity.user_id.to_string(),
            role: identity.role,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| {
                error!("Session signing failed: {}", e);
                LibraryError::DependencyFailure("session signing failed".to_string())
            })?;
        Ok(IssuedSession { token, expires_at })
    }

    pub fn validate(&self, token: &str) -> LibraryResult<Identity> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(|e| {
                debug!("Rejected session token: {}", e);
                LibraryError::Unauthenticated(AuthFailure::InvalidSession)
            })?;

        let user_id = data
            .claims
            .sub
            .parse::<i64>()
            .map_err(|_| LibraryError::Unauthenticated(AuthFailure::InvalidSession))?;

        Ok(Identity {
            user_id,
            role: data.claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn signer() -> SessionSigner {
        SessionSigner::new(SECRET, "ebook-hub", "ebook-hub-clients", Duration::hours(24))
    }

    fn assert_invalid(result: LibraryResult<Identity>) {
        assert!(matches!(
            result,
            Err(LibraryError::Unauthenticated(AuthFailure::InvalidSession))
        ));
    }

    #[test]
    fn round_trips_identity() {
        let signer = signer();
        for identity in [Identity::admin(), Identity::user(17)] {
            let issued = signer.issue(&identity).unwrap();
            assert_eq!(signer.validate(&issued.token).unwrap(), identity);
        }
    }

    #[test]
    fn expiry_follows_the_ttl() {
        let now = Utc::now();
        let issued = signer().issue_at(&Identity::user(1), now).unwrap();
        assert_eq!(issued.expires_at, now + Duration::hours(24));
    }

    #[test]
    fn rejects_expired_tokens() {
        let signer = signer();
        let issued = signer
            .issue_at(&Identity::user(1), Utc::now() - Duration::hours(48))
            .unwrap();
        assert_invalid(signer.validate(&issued.token));
    }

    #[test]
    fn rejects_foreign_signatures_issuers_and_audiences() {
        let token = signer().issue(&Identity::user(1)).unwrap().token;

        let other_key =
            SessionSigner::new("ffffffffffffffffffffffffffffffff", "ebook-hub", "ebook-hub-clients", Duration::hours(1));
        assert_invalid(other_key.validate(&token));

        let other_issuer =
            SessionSigner::new(SECRET, "someone-else", "ebook-hub-clients", Duration::hours(1));
        assert_invalid(other_issuer.validate(&token));

        let other_audience = SessionSigner::new(SECRET, "ebook-hub", "mobile", Duration::hours(1));
        assert_invalid(other_audience.validate(&token));

        assert_invalid(signer().validate("not.a.jwt"));
    }
}
