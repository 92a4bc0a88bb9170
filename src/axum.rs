use std::collections::HashMap;

use axum::extract::{FromRef, FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::headers::{Cookie, HeaderMapExt};
use serde_json::{json, Value};

use crate::error::ErrorRecord;
use crate::request::AuthRequest;
use crate::strategy::{JwtStrategy, Outcome};

/// The authenticated user of a request, as decided by the verify callback.
///
/// Requires a [`JwtStrategy<U>`] reachable from the router state through
/// [`FromRef`]. The request body is not available at this point, so body
/// extractors never match here.
///
/// # Examples
///
/// ```ignore
/// #[derive(Clone, FromRef)]
/// struct AppState {
///     strategy: JwtStrategy<User>,
/// }
///
/// async fn me(Authenticated { user, .. }: Authenticated<User>) -> Json<User> {
///     Json(user)
/// }
/// ```
#[derive(Debug)]
pub struct Authenticated<U> {
    pub user: U,
    pub info: Option<Value>,
}

impl<S, U> FromRequestParts<S> for Authenticated<U>
where
    JwtStrategy<U>: FromRef<S>,
    S: Send + Sync,
    U: Send + 'static,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let strategy = JwtStrategy::<U>::from_ref(state);
        let request = AuthRequest::from(&*parts);

        match strategy.authenticate(&request).await {
            Outcome::Success { user, info } => Ok(Authenticated { user, info }),
            Outcome::Fail { challenge, status } => Err(Rejection::Fail { challenge, status }),
            Outcome::Error(err) => Err(Rejection::Error(err)),
        }
    }
}

impl From<&Parts> for AuthRequest {
    fn from(parts: &Parts) -> Self {
        // Non-UTF-8 header values cannot carry a token and are skipped
        let headers = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_owned(), value.to_owned()))
            })
            .collect();

        let query = parts.uri.query().and_then(|_| {
            Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
                .ok()
                .map(|Query(query)| query)
        });

        let cookies = parts.headers.typed_get::<Cookie>().map(|cookie| {
            cookie
                .iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect()
        });

        AuthRequest {
            headers: Some(headers),
            query,
            body: None,
            cookies,
        }
    }
}

/// Rejection produced by [`Authenticated`] when the attempt does not succeed.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("Authentication failed")]
    Fail {
        challenge: Option<Value>,
        status: u16,
    },
    #[error("{}", .0.message)]
    Error(ErrorRecord),
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Rejection::Fail { challenge, status } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::UNAUTHORIZED);
                match challenge {
                    Some(challenge) => (status, Json(challenge)).into_response(),
                    None => status.into_response(),
                }
            }
            Rejection::Error(err) if err.code.as_deref() == Some("TOKEN_NOT_FOUND") => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": err.message, "code": err.code })),
            )
                .into_response(),
            Rejection::Error(err) => {
                tracing::error!("Authentication error: {:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::extract::Request;

    use super::*;
    use crate::error::Error;
    use crate::extractors::{from_auth_header_as_bearer_token, from_cookie, from_query_param};
    use crate::extractors::TokenExtractor;

    fn parts(req: Request) -> Parts {
        req.into_parts().0
    }

    #[test]
    fn test_request_from_parts_headers() {
        let parts = parts(
            Request::builder()
                .header("Authorization", "Bearer my_jwt_token")
                .body(Body::empty())
                .unwrap(),
        );

        let request = AuthRequest::from(&parts);
        assert_eq!(
            from_auth_header_as_bearer_token()
                .extract(&request)
                .as_deref(),
            Some("my_jwt_token")
        );
        assert!(request.query.is_none());
        assert!(request.body.is_none());
        assert!(request.cookies.is_none());
    }

    #[test]
    fn test_request_from_parts_query() {
        let parts = parts(
            Request::builder()
                .uri("http://example.com/api?token=my%2Ejwt&other=value")
                .body(Body::empty())
                .unwrap(),
        );

        let request = AuthRequest::from(&parts);
        assert_eq!(
            from_query_param("token").extract(&request).as_deref(),
            Some("my.jwt")
        );
    }

    #[test]
    fn test_request_from_parts_cookies() {
        let parts = parts(
            Request::builder()
                .header("Cookie", "session=abc123; auth_token=my_jwt; user_id=456")
                .body(Body::empty())
                .unwrap(),
        );

        let request = AuthRequest::from(&parts);
        assert_eq!(
            from_cookie("auth_token").extract(&request).as_deref(),
            Some("my_jwt")
        );
        assert_eq!(from_cookie("missing").extract(&request), None);
    }

    #[test]
    fn test_fail_rejection_status() {
        let response = Rejection::Fail {
            challenge: Some(json!("User not found")),
            status: 404,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = Rejection::Fail {
            challenge: None,
            status: 401,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_fail_rejection_invalid_status_falls_back_to_401() {
        let response = Rejection::Fail {
            challenge: None,
            status: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_error_rejection_status() {
        let response = Rejection::Error(Error::TokenNotFound.into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = Rejection::Error(Error::Unresolved.into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
