//! Per-session CSRF tokens

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use subtle::ConstantTimeEq;
use tokio::time::Instant;

/// Header carrying the token on mutating requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

pub const TOKEN_TTL: Duration = Duration::from_secs(3600);

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct CsrfToken {
    value: String,
    issued_at: Instant,
}

impl CsrfToken {
    pub fn generate() -> Self {
        Self {
            value: random_token(TOKEN_BYTES),
            issued_at: Instant::now(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_expired(&self) -> bool {
        self.issued_at.elapsed() >= TOKEN_TTL
    }

    /// Constant-time comparison; expired tokens never match.
    pub fn verify(&self, candidate: &str) -> bool {
        !self.is_expired() && bool::from(self.value.as_bytes().ct_eq(candidate.as_bytes()))
    }
}

/// `len` random bytes, URL-safe base64 without padding.
pub(crate) fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = CsrfToken::generate();
        let b = CsrfToken::generate();
        assert_eq!(a.value().len(), 43);
        assert!(a
            .value()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(a.value(), b.value());
    }

    #[tokio::test(start_paused = true)]
    async fn verify_matches_until_expiry() {
        let token = CsrfToken::generate();
        let value = token.value().to_string();
        assert!(token.verify(&value));
        assert!(!token.verify("forged"));

        tokio::time::advance(TOKEN_TTL).await;
        assert!(!token.verify(&value));
    }
}
