//! Caller identity
//!
//! Authentication happens in the gateway in front of this service; it
//! forwards the authenticated user id in the `x-user-id` header.

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Id of the user making the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub i64);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_ID_HEADER) else {
            warn!(path = %parts.uri.path(), "Request without caller identity");
            return Err(ApiError::Unauthorized(format!(
                "missing {} header",
                USER_ID_HEADER
            )));
        };

        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(CurrentUser)
            .ok_or_else(|| {
                ApiError::Unauthorized(format!("{} header is not a user id", USER_ID_HEADER))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<CurrentUser, ApiError> {
        let mut builder = Request::builder().uri("/clips/1/attempts");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CurrentUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_parses_numeric_header() {
        assert_eq!(extract(Some(" 42 ")).await.unwrap(), CurrentUser(42));
    }

    #[tokio::test]
    async fn test_missing_or_garbled_header_is_unauthorized() {
        assert!(matches!(extract(None).await, Err(ApiError::Unauthorized(_))));
        assert!(matches!(extract(Some("alice")).await, Err(ApiError::Unauthorized(_))));
    }
}
