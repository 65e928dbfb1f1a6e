//! Authentication support for the sync server.
//!
//! This module provides bearer-token authentication using HMAC-SHA256.
//! Tokens are bound to one device and carry their issue time for
//! expiration checking.
//!
//! ## Token Format
//!
//! `<device_id>.<issued_at>.<signature>` where `issued_at` is Unix millis
//! and `signature` is the hex-encoded HMAC-SHA256 of
//! `<device_id>.<issued_at>`.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates device tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token for a device.
    pub fn create_token(&self, device_id: &str) -> ServerResult<String> {
        let claims = format!("{device_id}.{}", now_millis());
        let signature = self.sign(claims.as_bytes())?;
        Ok(format!("{claims}.{}", hex::encode(signature)))
    }

    /// Validates a token presented by `expected_device_id`.
    ///
    /// Malformed, forged or expired tokens fail with
    /// [`ServerError::AuthenticationFailed`]; a valid token issued to
    /// another device fails with [`ServerError::NotAuthorized`].
    pub fn validate_token(&self, token: &str, expected_device_id: &str) -> ServerResult<()> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(signature), Some(issued_at), Some(device_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ServerError::AuthenticationFailed("malformed token".into()));
        };

        let claims = &token[..token.len() - signature.len() - 1];
        let signature = hex::decode(signature)
            .map_err(|_| ServerError::AuthenticationFailed("malformed signature".into()))?;
        let mut mac = self.mac()?;
        mac.update(claims.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| ServerError::AuthenticationFailed("invalid signature".into()))?;

        let issued_at: u64 = issued_at
            .parse()
            .map_err(|_| ServerError::AuthenticationFailed("malformed issue time".into()))?;
        let expiry_millis = self.config.token_expiry.as_millis() as u64;
        if now_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(ServerError::AuthenticationFailed("token expired".into()));
        }

        if device_id != expected_device_id {
            return Err(ServerError::NotAuthorized("token issued to another device".into()));
        }

        Ok(())
    }

    fn sign(&self, data: &[u8]) -> ServerResult<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn mac(&self) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("invalid auth secret: {e}")))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: &str = "7f0c2a8e-3b1d-4c55-9a4e-2d6f1b0c9e11";

    fn validator() -> TokenValidator {
        TokenValidator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let validator = validator();
        let token = validator.create_token(DEVICE).unwrap();
        assert!(token.starts_with(DEVICE));
        assert!(validator.validate_token(&token, DEVICE).is_ok());
    }

    #[test]
    fn reject_wrong_device() {
        let validator = validator();
        let token = validator.create_token(DEVICE).unwrap();

        let result = validator.validate_token(&token, "another-device");
        assert!(matches!(result, Err(ServerError::NotAuthorized(_))));
    }

    #[test]
    fn reject_tampered_token() {
        let validator = validator();
        let token = validator.create_token(DEVICE).unwrap();
        let forged = token.replacen(DEVICE, "another-device", 1);

        let result = validator.validate_token(&forged, "another-device");
        assert!(matches!(result, Err(ServerError::AuthenticationFailed(_))));
    }

    #[test]
    fn reject_foreign_secret() {
        let token = validator().create_token(DEVICE).unwrap();
        let other = TokenValidator::new(AuthConfig::new(b"different-secret".to_vec()));

        assert!(matches!(
            other.validate_token(&token, DEVICE),
            Err(ServerError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn reject_malformed_token() {
        let validator = validator();
        for token in ["", "garbage", "a.b", "a.123.zz"] {
            assert!(matches!(
                validator.validate_token(token, "a"),
                Err(ServerError::AuthenticationFailed(_))
            ));
        }
    }

    #[test]
    fn reject_expired_token() {
        let config = AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec())
            .with_expiry(Duration::from_secs(0));
        let validator = TokenValidator::new(config);

        let token = validator.create_token(DEVICE).unwrap();

        // Wait a tiny bit to ensure expiration
        std::thread::sleep(Duration::from_millis(10));

        let result = validator.validate_token(&token, DEVICE);
        assert!(matches!(result, Err(ServerError::AuthenticationFailed(_))));
    }
}
