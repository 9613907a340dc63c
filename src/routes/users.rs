use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    error::{ApiError, ApiResponse, ApiResult},
    middleware::{
        auth::{get_cookie, ACCESS_COOKIE, REFRESH_COOKIE},
        rate_limit::check_rate_limit,
        upload::UploadedForm,
    },
    models::{
        auth::AuthenticatedUser,
        user::{LoginRequest, LoginResponse, RefreshTokenRequest, User, UserProfile},
    },
    services::auth::{AuthService, Registration, Session},
    AppState,
};

const LOGIN_ATTEMPTS: u64 = 5;
const LOGIN_WINDOW_SECS: u64 = 15 * 60;

fn cookie(name: &str, value: &str, max_age: u64, secure: bool) -> String {
    let mut c = format!("{name}={value}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age}");
    if secure {
        c.push_str("; Secure");
    }
    c
}

/// Attach `Set-Cookie` headers to a response.
fn with_cookies(response: impl IntoResponse, cookies: &[String]) -> Result<Response, ApiError> {
    let mut response = response.into_response();
    for c in cookies {
        let value = HeaderValue::from_str(c).map_err(ApiError::internal)?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

fn session_response(state: &AppState, message: &str, session: Session) -> Result<Response, ApiError> {
    let secure = state.config.secure_cookies;
    let cookies = [
        cookie(
            ACCESS_COOKIE,
            &session.access_token,
            state.config.access_token_expiry_seconds,
            secure,
        ),
        cookie(
            REFRESH_COOKIE,
            &session.refresh_token,
            state.config.refresh_token_expiry_days * 86_400,
            secure,
        ),
    ];
    let body = ApiResponse::ok(
        message,
        LoginResponse {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            user: UserProfile::from(session.user),
        },
    );
    with_cookies(body, &cookies)
}

pub async fn register(State(state): State<AppState>, form: UploadedForm) -> ApiResult<UserProfile> {
    let result = register_user(&state, &form).await;
    if result.is_err() {
        state.uploads.discard(&form.uploads).await;
    }
    let user = result?;
    Ok(ApiResponse::created("User registered successfully", UserProfile::from(user)))
}

async fn register_user(state: &AppState, form: &UploadedForm) -> Result<User, ApiError> {
    let input = Registration {
        username: form.fields.require("username")?,
        email: form.fields.require("email")?,
        password: form.fields.get("password").unwrap_or_default().to_string(),
        bio: form.fields.text("bio"),
        profile_picture_url: Some(form.uploads.require_url("profile_picture")?),
    };
    AuthService::register(state.users.as_ref(), &state.credentials, input).await
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let identifier = body
        .identifier()
        .ok_or_else(|| ApiError::BadRequest("username or email is required".to_string()))?;

    let rate_key = format!("rate:login:{}", identifier.to_lowercase());
    check_rate_limit(state.redis.as_ref(), &rate_key, LOGIN_ATTEMPTS, LOGIN_WINDOW_SECS).await?;

    let session =
        AuthService::login(state.users.as_ref(), &state.credentials, identifier, &body.password).await?;
    session_response(&state, "User logged in successfully", session)
}

/// Refresh token from the cookie, else from the JSON body.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let from_body = || -> Result<Option<String>, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let req: RefreshTokenRequest = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;
        Ok(req.refresh_token)
    };

    let token = match get_cookie(&headers, REFRESH_COOKIE) {
        Some(token) => token,
        None => from_body()?
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Refresh token is required".to_string()))?,
    };

    let session = AuthService::refresh(state.users.as_ref(), &state.credentials, &token).await?;
    session_response(&state, "Access token refreshed", session)
}

pub async fn logout(State(state): State<AppState>, user: AuthenticatedUser) -> Result<Response, ApiError> {
    AuthService::logout(state.users.as_ref(), &state.credentials, user.user_id).await?;

    let secure = state.config.secure_cookies;
    with_cookies(
        ApiResponse::ok("User logged out", ()),
        &[
            cookie(ACCESS_COOKIE, "", 0, secure),
            cookie(REFRESH_COOKIE, "", 0, secure),
        ],
    )
}

pub async fn me(State(state): State<AppState>, user: AuthenticatedUser) -> ApiResult<UserProfile> {
    let record = state
        .users
        .find_by_id(user.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid user".to_string()))?;
    Ok(ApiResponse::ok("Current user", UserProfile::from(record)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookies_are_http_only_and_optionally_secure() {
        let plain = cookie(ACCESS_COOKIE, "tok", 900, false);
        assert_eq!(plain, "accessToken=tok; HttpOnly; SameSite=Lax; Path=/; Max-Age=900");
        assert!(cookie(REFRESH_COOKIE, "r", 10, true).ends_with("; Secure"));
    }
}
