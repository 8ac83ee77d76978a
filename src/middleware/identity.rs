//! Caller identity.
//!
//! JWT validation happens in the authenticating proxy in front of this
//! service; the proxy forwards the verified user id in the `x-user-id`
//! header. [`identity_middleware`] parses that header into an
//! [`AuthenticatedUser`] request extension, and handlers take it through the
//! `FromRequestParts` impl.

use crate::error::{AppError, AppErrorKind, AuthenticationError};
use crate::middleware::error::get_request_id_from_headers;
use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

/// Resolves the caller from `x-user-id`.
///
/// A missing header passes through unauthenticated; a malformed one is
/// rejected here with 401.
pub async fn identity_middleware(mut request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(USER_ID_HEADER)
        .map(|value| value.to_str().map(str::trim));

    match header {
        None => {}
        Some(Ok(raw)) => match Uuid::parse_str(raw) {
            Ok(user_id) => {
                request
                    .extensions_mut()
                    .insert(AuthenticatedUser { user_id });
            }
            Err(e) => {
                return reject(
                    &request,
                    AuthenticationError::InvalidIdentity {
                        reason: format!("{} is not a valid UUID: {}", USER_ID_HEADER, e),
                    },
                )
            }
        },
        Some(Err(_)) => {
            return reject(
                &request,
                AuthenticationError::InvalidIdentity {
                    reason: format!("{} contains non-ASCII characters", USER_ID_HEADER),
                },
            )
        }
    }

    next.run(request).await
}

fn reject(request: &Request, error: AuthenticationError) -> Response {
    warn!(path = %request.uri().path(), error = ?error, "rejected caller identity");
    let mut app_error = AppError::new(AppErrorKind::Authentication(error));
    if let Some(request_id) = get_request_id_from_headers(request.headers()) {
        app_error = app_error.with_request_id(request_id);
    }
    app_error.into_response()
}

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .copied()
            .ok_or_else(|| {
                let error = AppError::new(AppErrorKind::Authentication(
                    AuthenticationError::MissingIdentity,
                ));
                match get_request_id_from_headers(&parts.headers) {
                    Some(request_id) => error.with_request_id(request_id),
                    None => error,
                }
            })
    }
}
