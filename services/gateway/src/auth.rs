use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

/// Pulls the bearer token out of an `Authorization` header, if present.
pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

/// Compares `provided` against the configured secret in constant time, so
/// a timing side-channel can't be used to guess the secret byte by byte.
pub fn verify_token(provided: &str, configured: &str) -> bool {
    provided.as_bytes().ct_eq(configured.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer s3cret"),
        );
        assert_eq!(extract_bearer(&headers).as_deref(), Some("s3cret"));
    }

    #[test]
    fn missing_header_yields_none() {
        let headers = HeaderMap::new();
        assert!(extract_bearer(&headers).is_none());
    }

    #[test]
    fn verify_token_matches_and_rejects() {
        assert!(verify_token("s3cret", "s3cret"));
        assert!(!verify_token("wrong", "s3cret"));
    }
}
