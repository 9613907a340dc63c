use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use uuid::Uuid;

use crate::{error::ApiError, models::auth::AuthenticatedUser, AppState};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Value of cookie `name`, if the request carries it.
pub fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|part| part.trim().strip_prefix(&prefix).map(str::to_string))
        .filter(|v| !v.is_empty())
}

/// Access token from the `accessToken` cookie, else from `Authorization: Bearer`.
pub fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    get_cookie(headers, ACCESS_COOKIE).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}

/// Verify `token` and resolve it to a principal with one user-store read.
async fn resolve(state: &AppState, token: &str) -> Result<AuthenticatedUser, ApiError> {
    let claims = state
        .credentials
        .verify_access_token(token)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired access token".to_string()))?;
    let user_id: Uuid = claims
        .sub
        .parse()
        .map_err(|_| ApiError::Unauthorized("Invalid or expired access token".to_string()))?;

    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid user".to_string()))?;

    Ok(AuthenticatedUser::from(&user))
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_access_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("Access token is required".to_string()))?;
        resolve(state, &token).await
    }
}

/// Public endpoints: no token means anonymous, a bad token is still rejected.
impl OptionalFromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Option<Self>, Self::Rejection> {
        match extract_access_token(&parts.headers) {
            Some(token) => resolve(state, &token).await.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn cookie_is_found_among_others() {
        let h = headers(&[(header::COOKIE, "theme=dark; accessToken=abc.def; refreshToken=r")]);
        assert_eq!(get_cookie(&h, ACCESS_COOKIE).as_deref(), Some("abc.def"));
        assert_eq!(get_cookie(&h, REFRESH_COOKIE).as_deref(), Some("r"));
        assert_eq!(get_cookie(&h, "missing"), None);
    }

    #[test]
    fn cookie_wins_over_bearer() {
        let h = headers(&[
            (header::COOKIE, "accessToken=from-cookie"),
            (header::AUTHORIZATION, "Bearer from-header"),
        ]);
        assert_eq!(extract_access_token(&h).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn bearer_is_used_without_cookie() {
        let h = headers(&[(header::AUTHORIZATION, "Bearer tok")]);
        assert_eq!(extract_access_token(&h).as_deref(), Some("tok"));

        let basic = headers(&[(header::AUTHORIZATION, "Basic dXNlcg==")]);
        assert_eq!(extract_access_token(&basic), None);

        let empty_cookie = headers(&[(header::COOKIE, "accessToken=")]);
        assert_eq!(extract_access_token(&empty_cookie), None);
    }
}
