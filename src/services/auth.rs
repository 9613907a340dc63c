use uuid::Uuid;

use crate::{
    db::users::UserStore,
    error::ApiError,
    models::{
        auth::AuthenticatedUser,
        user::{NewUser, User},
    },
    services::credentials::CredentialService,
};

pub const MIN_PASSWORD_LEN: usize = 8;
const MAX_USERNAME_LEN: usize = 30;

/// Registration input after multipart decoding and upload.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub bio: Option<String>,
    pub profile_picture_url: Option<String>,
}

/// Tokens handed out by login and refresh.
#[derive(Debug)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

pub struct AuthService;

impl AuthService {
    pub async fn register(
        store: &dyn UserStore,
        credentials: &CredentialService,
        input: Registration,
    ) -> Result<User, ApiError> {
        let username = input.username.trim().to_lowercase();
        let email = input.email.trim().to_lowercase();
        validate_username(&username)?;
        validate_email(&email)?;
        if input.password.len() < MIN_PASSWORD_LEN {
            return Err(ApiError::BadRequest(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        if store.exists(&username, &email).await? {
            return Err(ApiError::Conflict(
                "User with this username or email already exists".to_string(),
            ));
        }

        let password_hash = credentials.hash_password(&input.password)?;
        let user = store
            .create(NewUser {
                username,
                email,
                password_hash,
                profile_picture_url: input.profile_picture_url,
                bio: input.bio.filter(|b| !b.trim().is_empty()),
            })
            .await?;

        tracing::info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(user)
    }

    /// Unknown identifier and wrong password are reported identically.
    pub async fn login(
        store: &dyn UserStore,
        credentials: &CredentialService,
        identifier: &str,
        password: &str,
    ) -> Result<Session, ApiError> {
        let invalid = || ApiError::Unauthorized("Invalid credentials".to_string());

        let user = store.find_by_login(identifier).await?.ok_or_else(invalid)?;
        if !credentials.verify_password(password, &user.password_hash) {
            tracing::debug!(user_id = %user.id, "password mismatch");
            return Err(invalid());
        }

        let session = Self::open_session(store, credentials, user).await?;
        tracing::info!(user_id = %session.user.id, "user logged in");
        Ok(session)
    }

    /// Exchange a valid refresh token for a new pair. The old refresh token
    /// stops working immediately.
    pub async fn refresh(
        store: &dyn UserStore,
        credentials: &CredentialService,
        refresh_token: &str,
    ) -> Result<Session, ApiError> {
        let user = credentials.verify_refresh_token(store, refresh_token).await?;
        Self::open_session(store, credentials, user).await
    }

    pub async fn logout(
        store: &dyn UserStore,
        credentials: &CredentialService,
        user_id: Uuid,
    ) -> Result<(), ApiError> {
        credentials.revoke_refresh_token(store, user_id).await?;
        tracing::info!(user_id = %user_id, "user logged out");
        Ok(())
    }

    async fn open_session(
        store: &dyn UserStore,
        credentials: &CredentialService,
        user: User,
    ) -> Result<Session, ApiError> {
        let access_token = credentials.issue_access_token(&AuthenticatedUser::from(&user))?;
        let refresh_token = credentials.issue_refresh_token(store, user.id).await?;
        Ok(Session {
            user,
            access_token,
            refresh_token,
        })
    }
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.is_empty() {
        return Err(ApiError::BadRequest("username is required".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LEN
        || !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err(ApiError::BadRequest(format!(
            "username must be at most {MAX_USERNAME_LEN} characters of letters, digits, '_', '.' or '-'"
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ if email.is_empty() => Err(ApiError::BadRequest("email is required".to_string())),
        _ => Err(ApiError::BadRequest("email is invalid".to_string())),
    }
}
