//! Admin surface authorization.

use std::net::SocketAddr;

use http::HeaderMap;
use http::header::AUTHORIZATION;
use tracing::warn;

use crate::error::ApiError;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Debug, Clone, Default)]
pub struct AdminAuth {
    token: Option<String>,
}

impl AdminAuth {
    /// A blank token counts as unset.
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    /// With a configured secret, require it via `Authorization: Bearer` or
    /// `X-Admin-Token`. Without one, only loopback peers get in.
    pub fn authorize(&self, headers: &HeaderMap, peer: SocketAddr) -> Result<(), ApiError> {
        match &self.token {
            Some(expected) => {
                let presented = presented_token(headers).ok_or(ApiError::Unauthorized)?;
                if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
                    Ok(())
                } else {
                    warn!(peer = %peer, "admin: rejected token");
                    Err(ApiError::Unauthorized)
                }
            }
            None if peer.ip().is_loopback() => Ok(()),
            None => {
                warn!(peer = %peer, "admin: non-loopback access without a configured token");
                Err(ApiError::Forbidden)
            }
        }
    }
}

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    bearer
        .or_else(|| {
            headers
                .get(ADMIN_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
        .filter(|t| !t.is_empty())
}

/// Length is not secret; content comparison does not short-circuit.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn loopback() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn remote() -> SocketAddr {
        "203.0.113.9:5000".parse().unwrap()
    }

    #[test]
    fn no_token_allows_only_loopback() {
        let auth = AdminAuth::new(None);
        assert!(auth.authorize(&HeaderMap::new(), loopback()).is_ok());
        assert!(matches!(
            auth.authorize(&HeaderMap::new(), remote()),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn blank_token_is_treated_as_unset() {
        let auth = AdminAuth::new(Some("  ".into()));
        assert!(matches!(
            auth.authorize(&HeaderMap::new(), remote()),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn bearer_and_custom_header_are_accepted() {
        let auth = AdminAuth::new(Some("s3cret".into()));

        let mut bearer = HeaderMap::new();
        bearer.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(auth.authorize(&bearer, remote()).is_ok());

        let mut custom = HeaderMap::new();
        custom.insert(ADMIN_TOKEN_HEADER, HeaderValue::from_static("s3cret"));
        assert!(auth.authorize(&custom, remote()).is_ok());
    }

    #[test]
    fn configured_token_is_required_even_on_loopback() {
        let auth = AdminAuth::new(Some("s3cret".into()));
        assert!(matches!(
            auth.authorize(&HeaderMap::new(), loopback()),
            Err(ApiError::Unauthorized)
        ));

        let mut wrong = HeaderMap::new();
        wrong.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3creT"));
        assert!(matches!(
            auth.authorize(&wrong, loopback()),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn constant_time_eq_compares_content() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
