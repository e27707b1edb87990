use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::utils::{verify_token, Claims};

/// Authenticated admin, stored in request extensions
#[derive(Debug, Clone)]
pub struct AuthAdmin {
    pub admin_id: i64,
    pub username: String,
}

impl From<Claims> for AuthAdmin {
    fn from(claims: Claims) -> Self {
        Self {
            admin_id: claims.sub,
            username: claims.username,
        }
    }
}

/// Admin-only authentication middleware
pub async fn admin_middleware(
    State(jwt_secret): State<String>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidToken)?;

    let claims = verify_token(token, &jwt_secret).map_err(|_| AuthError::InvalidToken)?;

    if !claims.is_admin {
        return Err(AuthError::Forbidden);
    }

    let admin = AuthAdmin::from(claims);
    tracing::debug!("Admin request by {}", admin.username);
    request.extensions_mut().insert(admin);

    Ok(next.run(request).await)
}

/// Authentication errors
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            AuthError::MissingToken => (
                StatusCode::UNAUTHORIZED,
                "MISSING_TOKEN",
                "Authorization token is missing",
            ),
            AuthError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "Authorization token is invalid or expired",
            ),
            AuthError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Admin access required",
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
