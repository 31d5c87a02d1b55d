use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use uuid::Uuid;

/// Request authentication (JWT / API-key verification) is an external
/// collaborator per scope — this extractor only stands in for it so the
/// routes below have someone to charge. It trusts a bearer token that is
/// literally the caller's user id; a real deployment sits a verifying proxy
/// or middleware in front of this that replaces the header with a verified
/// claim before the request reaches here.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or((StatusCode::UNAUTHORIZED, "expected a bearer token"))?;

        let user_id = Uuid::parse_str(token)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid bearer token"))?;

        Ok(AuthUser(user_id))
    }
}
