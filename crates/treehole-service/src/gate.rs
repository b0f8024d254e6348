use std::sync::Arc;

use axum::http::HeaderValue;
use treehole_core::TreeholeError;

/// Request header carrying the operator credential.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Capability check for operator routes. Every request re-presents the
/// credential; nothing is issued or remembered.
#[derive(Clone)]
pub struct AdminGate {
    secret: Arc<str>,
}

impl std::fmt::Debug for AdminGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGate").field("secret", &"<redacted>").finish()
    }
}

impl AdminGate {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::from(secret),
        }
    }

    /// Compares the presented header value verbatim with the configured secret.
    ///
    /// # Errors
    /// Returns [`TreeholeError::Unauthorized`] when the header is absent, empty,
    /// not valid UTF-8, or different from the secret.
    pub fn authorize(&self, presented: Option<&HeaderValue>) -> Result<(), TreeholeError> {
        let Some(value) = presented.and_then(|value| value.to_str().ok()) else {
            return Err(TreeholeError::Unauthorized);
        };

        if value.is_empty() || value != &*self.secret {
            return Err(TreeholeError::Unauthorized);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_secret_is_authorized() {
        let gate = AdminGate::new("open-sesame");
        assert_eq!(gate.authorize(Some(&HeaderValue::from_static("open-sesame"))), Ok(()));
    }

    #[test]
    fn missing_empty_or_wrong_credentials_are_rejected() {
        let gate = AdminGate::new("open-sesame");
        let candidates = [
            None,
            Some(HeaderValue::from_static("")),
            Some(HeaderValue::from_static("open-sesame ")),
        ];
        for presented in candidates {
            assert_eq!(gate.authorize(presented.as_ref()), Err(TreeholeError::Unauthorized));
        }
    }

    #[test]
    fn empty_secret_never_authorizes() {
        let gate = AdminGate::new("");
        assert_eq!(
            gate.authorize(Some(&HeaderValue::from_static(""))),
            Err(TreeholeError::Unauthorized)
        );
    }

    #[test]
    fn non_utf8_header_is_rejected() {
        let gate = AdminGate::new("open-sesame");
        let value = match HeaderValue::from_bytes(&[0xff, 0xfe]) {
            Ok(value) => value,
            Err(err) => panic!("failed to build header: {err}"),
        };
        assert_eq!(gate.authorize(Some(&value)), Err(TreeholeError::Unauthorized));
    }
}
