//! Stateless bearer tokens.
//!
//! Wire form: `base64url(payload) "." base64url(hmac_sha256(secret, payload))`
//! where the payload is JSON `{"sub": user id, "exp": unix millis, "nonce": hex}`.
//! Nothing is persisted server-side; there is no revocation list.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use photovault_shared::UserId;

use crate::error::ServerError;
use crate::password::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;

#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    sub: String,
    exp: i64,
    nonce: String,
}

/// What a valid token vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenService {
    mac: HmacSha256,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self, ServerError> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| ServerError::Internal(format!("Invalid token secret: {e}")))?;
        Ok(Self { mac, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user_id: &UserId) -> Result<String, ServerError> {
        self.issue_at(user_id, Utc::now())
    }

    /// Issue a token valid until `now + ttl`.
    pub fn issue_at(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<String, ServerError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| ServerError::Internal("Token expiry out of range".to_string()))?;
        let payload = TokenPayload {
            sub: user_id.as_str().to_string(),
            exp: expires_at.timestamp_millis(),
            nonce: hex::encode(nonce),
        };
        let payload = serde_json::to_vec(&payload)
            .map_err(|e| ServerError::Internal(format!("Token encoding failed: {e}")))?;

        let signature = self.sign(&payload);
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    pub fn verify(&self, token: &str) -> Option<TokenClaims> {
        self.verify_at(token, Utc::now())
    }

    /// Verify signature and expiry against `now`.
    ///
    /// Every failure is `None`; callers get no hint about which check failed.
    /// A token is invalid at and after its expiry instant.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Option<TokenClaims> {
        let (payload_b64, signature_b64) = token.trim().split_once('.')?;
        if payload_b64.is_empty() || signature_b64.is_empty() {
            return None;
        }

        let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;

        let expected = self.sign(&payload);
        if !constant_time_eq(&expected, &signature) {
            return None;
        }

        let payload: TokenPayload = serde_json::from_slice(&payload).ok()?;
        if now.timestamp_millis() >= payload.exp {
            return None;
        }

        let expires_at = DateTime::from_timestamp_millis(payload.exp)?;
        if payload.sub.is_empty() {
            return None;
        }

        Some(TokenClaims {
            user_id: UserId::from_stored(payload.sub),
            expires_at,
        })
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(b"test-secret-0123456789", Duration::hours(1)).unwrap()
    }

    #[test]
    fn test_issue_then_verify() {
        let tokens = service();
        let user = UserId::normalize("alice");
        let now = Utc::now();

        let token = tokens.issue_at(&user, now).unwrap();
        let claims = tokens.verify_at(&token, now).unwrap();
        assert_eq!(claims.user_id, user);
        assert_eq!(
            claims.expires_at.timestamp_millis(),
            (now + Duration::hours(1)).timestamp_millis()
        );
    }

    #[test]
    fn test_expired_after_ttl() {
        let tokens = service();
        let user = UserId::normalize("alice");
        let now = Utc::now();
        let token = tokens.issue_at(&user, now).unwrap();

        assert!(tokens
            .verify_at(&token, now + Duration::minutes(59))
            .is_some());
        // Invalid exactly at the expiry instant and afterwards.
        assert!(tokens.verify_at(&token, now + Duration::hours(1)).is_none());
        assert!(tokens.verify_at(&token, now + Duration::hours(2)).is_none());
    }

    #[test]
    fn test_repeated_issuance_is_unique() {
        let tokens = service();
        let user = UserId::normalize("alice");
        let now = Utc::now();
        assert_ne!(
            tokens.issue_at(&user, now).unwrap(),
            tokens.issue_at(&user, now).unwrap()
        );
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let tokens = service();
        let token = tokens.issue(&UserId::normalize("alice")).unwrap();
        let (payload, signature) = token.split_once('.').unwrap();

        let mut sig = URL_SAFE_NO_PAD.decode(signature).unwrap();
        sig[0] ^= 0x01;
        let forged = format!("{payload}.{}", URL_SAFE_NO_PAD.encode(sig));
        assert!(tokens.verify(&forged).is_none());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let tokens = service();
        let token = tokens.issue(&UserId::normalize("alice")).unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let forged_payload = URL_SAFE_NO_PAD
            .encode(br#"{"sub":"mallory","exp":99999999999999,"nonce":"00"}"#);
        assert!(tokens.verify(&format!("{forged_payload}.{signature}")).is_none());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = service().issue(&UserId::normalize("alice")).unwrap();
        let other = TokenService::new(b"another-secret-987654", Duration::hours(1)).unwrap();
        assert!(other.verify(&token).is_none());
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let tokens = service();
        for garbage in ["", ".", "abc", "abc.", ".abc", "!!!.???", "a.b.c"] {
            assert!(tokens.verify(garbage).is_none(), "accepted {garbage:?}");
        }
        // Truncated signature: length mismatch.
        let token = tokens.issue(&UserId::normalize("alice")).unwrap();
        assert!(tokens.verify(&token[..token.len() - 4]).is_none());
    }

    #[test]
    fn test_unrepresentable_expiry_is_an_error() {
        let tokens = TokenService::new(b"test-secret-0123456789", Duration::days(365)).unwrap();
        let near_end = DateTime::<Utc>::MAX_UTC - Duration::days(1);
        assert!(matches!(
            tokens.issue_at(&UserId::normalize("alice"), near_end),
            Err(ServerError::Internal(_))
        ));
    }
}
