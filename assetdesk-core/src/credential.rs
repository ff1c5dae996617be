//! Downstream bearer credentials.

use secrecy::{ExposeSecret, SecretString};

/// Bearer credential for the upstream service.
///
/// Wraps the token in a `secrecy::SecretString` so it never ends up in logs
/// or `Debug` output.
#[derive(Clone)]
pub struct BearerToken(SecretString);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self(SecretString::new(token.into()))
    }

    /// Expose the token (only for building the `Authorization` header).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// `Authorization` header value.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.expose())
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BearerToken([REDACTED, {} chars])", self.expose().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let token = BearerToken::new("eyJhbGciOi.secret");
        let debug = format!("{:?}", token);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_authorization_header() {
        let token = BearerToken::new("abc");
        assert_eq!(token.authorization(), "Bearer abc");
        assert!(!token.is_empty());
        assert!(BearerToken::new("").is_empty());
    }
}
