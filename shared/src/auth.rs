use chrono::{DateTime, Duration, Utc};
use lambda_http::{http::HeaderMap, Body, Response};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;
use crate::email::Mailer;
use crate::errors::{ApiError, ApiResult};
use crate::lockout::Throttle;
use crate::password::{hash_password, validate_new_password, verify_password};
use crate::responses::{ok, parse_body};
use crate::store::{from_document, to_document, Condition, Key, Store, StoreError};
use crate::token::{
    self, Claims, Role, TokenKind, ADMIN_ACCESS_TTL_DAYS, MEMBER_ACCESS_TTL_HOURS,
    MEMBER_REFRESH_TTL_DAYS,
};
use crate::users::{self, Member, MemberStatus};

pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;

const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists for that email, a password reset link has been sent";
const INVALID_RESET_TOKEN: &str = "Invalid or expired reset token";

/// Bearer token from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("Authorization")?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

/// Verify the request's access token
pub fn authenticate(headers: &HeaderMap, config: &Config) -> ApiResult<Claims> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    match token::verify(token, &config.jwt_secret, Utc::now()) {
        Ok(claims) if claims.kind == TokenKind::Access => Ok(claims),
        Ok(_) => Err(ApiError::unauthorized("Invalid or expired token")),
        Err(e) => {
            tracing::warn!("Rejected bearer token: {}", e);
            Err(ApiError::unauthorized("Invalid or expired token"))
        }
    }
}

pub fn require_admin(claims: &Claims) -> ApiResult<()> {
    if claims.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Administrator access required".to_string()))
    }
}

/// Members must still be active when they act on their own records.
/// Administrators have no member record.
pub async fn require_active(store: &dyn Store, claims: &Claims) -> ApiResult<()> {
    if claims.is_admin() {
        return Ok(());
    }
    match users::load(store, &claims.sub).await? {
        Some(member) if member.status == MemberStatus::Active => Ok(()),
        Some(_) => Err(ApiError::Forbidden("Account is not active".to_string())),
        None => Err(ApiError::unauthorized("Invalid or expired token")),
    }
}

fn issue(claims: &Claims, config: &Config) -> ApiResult<String> {
    token::sign(claims, &config.jwt_secret).map_err(|e| ApiError::Internal(e.to_string()))
}

#[derive(Deserialize)]
pub struct AdminLoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminUser {
    username: String,
    role: Role,
    login_time: DateTime<Utc>,
}

/// POST /auth
pub async fn admin_login(store: &dyn Store, config: &Config, body: &[u8]) -> ApiResult<Response<Body>> {
    let req: AdminLoginRequest = parse_body(body)?;
    let (Some(username), Some(password)) = (req.username, req.password) else {
        return Err(ApiError::BadRequest(
            "Username and password are required".to_string(),
        ));
    };

    // Unknown usernames never count toward the administrator's lock
    if username != config.admin_username {
        tracing::warn!("Administrator login for unknown username {}", username);
        return Err(ApiError::unauthorized("Invalid username or password"));
    }

    let now = Utc::now();
    let throttle = Throttle::for_admin(&config.admin_username);
    let state = throttle.load(store).await?;
    throttle.ensure_unlocked(&state, now)?;

    if !verify_password(&password, &config.admin_password_hash) {
        tracing::warn!("Failed administrator login for {}", username);
        let failure = throttle.record_failure(store, &state, now).await?;
        return Err(failure.into_error("Invalid username or password"));
    }

    store.update(throttle.reset()).await?;

    let claims = Claims::new(
        &username,
        None,
        Role::Administrator,
        TokenKind::Access,
        now,
        Duration::days(ADMIN_ACCESS_TTL_DAYS),
    );
    tracing::info!("Administrator {} logged in", username);

    ok(&json!({
        "success": true,
        "message": "Login successful",
        "data": {
            "token": issue(&claims, config)?,
            "user": AdminUser { username, role: Role::Administrator, login_time: now },
            "expiresIn": format!("{} days", ADMIN_ACCESS_TTL_DAYS),
        }
    }))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// POST /auth/login
pub async fn member_login(store: &dyn Store, config: &Config, body: &[u8]) -> ApiResult<Response<Body>> {
    let req: LoginRequest = parse_body(body)?;
    let (Some(email), Some(password)) = (req.email, req.password) else {
        return Err(ApiError::BadRequest(
            "Email and password are required".to_string(),
        ));
    };

    let Some(member) = users::find_by_email(store, &email).await? else {
        tracing::warn!("Login for unknown email");
        return Err(ApiError::unauthorized("Invalid email or password"));
    };

    let now = Utc::now();
    let throttle = Throttle::for_user(&member.user_id);
    let state = member.authentication.login.clone();
    throttle.ensure_unlocked(&state, now)?;

    if !verify_password(&password, &member.authentication.password_hash) {
        tracing::warn!("Failed login for member {}", member.user_id);
        let failure = throttle.record_failure(store, &state, now).await?;
        return Err(failure.into_error("Invalid email or password"));
    }

    if member.status != MemberStatus::Active {
        return Err(ApiError::Forbidden("Account is not active".to_string()));
    }

    let item = store
        .update(throttle.reset().set("authentication.lastLogin", now.to_rfc3339()))
        .await?;
    let member = Member::from_item(item)?;

    let access = Claims::new(
        &member.user_id,
        Some(member.email.clone()),
        Role::Member,
        TokenKind::Access,
        now,
        Duration::hours(MEMBER_ACCESS_TTL_HOURS),
    );
    let refresh = Claims {
        kind: TokenKind::Refresh,
        exp: (now + Duration::days(MEMBER_REFRESH_TTL_DAYS)).timestamp(),
        ..access.clone()
    };
    tracing::info!("Member {} logged in", member.user_id);

    ok(&json!({
        "message": "Login successful",
        "token": issue(&access, config)?,
        "refreshToken": issue(&refresh, config)?,
        "user": member.public(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// POST /auth/refresh
pub async fn refresh(store: &dyn Store, config: &Config, body: &[u8]) -> ApiResult<Response<Body>> {
    let req: RefreshRequest = parse_body(body)?;
    let token = req
        .refresh_token
        .ok_or_else(|| ApiError::BadRequest("refreshToken is required".to_string()))?;

    let now = Utc::now();
    let claims = match token::verify(&token, &config.jwt_secret, now) {
        Ok(claims) if claims.kind == TokenKind::Refresh => claims,
        _ => return Err(ApiError::unauthorized("Invalid or expired refresh token")),
    };

    // the account may have been deactivated since the refresh token was issued
    match users::load(store, &claims.sub).await? {
        Some(member) if member.status == MemberStatus::Active => {}
        _ => return Err(ApiError::unauthorized("Invalid or expired refresh token")),
    }

    let access = Claims::new(
        claims.sub,
        claims.email,
        claims.role,
        TokenKind::Access,
        now,
        Duration::hours(MEMBER_ACCESS_TTL_HOURS),
    );
    ok(&json!({
        "token": issue(&access, config)?,
        "expiresIn": MEMBER_ACCESS_TTL_HOURS * 3600,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetToken {
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    /// Epoch seconds for DynamoDB TTL expiry
    pub ttl: i64,
}

impl ResetToken {
    pub fn key(token: &str) -> Key {
        Key::new(format!("RESET#{}", token), "RESET")
    }
}

fn generate_reset_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

/// POST /auth/forgot-password. Answers the same way whether or not the
/// address belongs to a member.
pub async fn forgot_password(
    store: &dyn Store,
    mailer: Option<&Mailer>,
    config: &Config,
    body: &[u8],
) -> ApiResult<Response<Body>> {
    let req: ForgotPasswordRequest = parse_body(body)?;
    let email = req
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Email is required".to_string()))?;

    if let Some(member) = users::find_by_email(store, &email).await? {
        let token = generate_reset_token();
        let expires_at = Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES);
        let record = ResetToken {
            user_id: member.user_id.clone(),
            expires_at,
            ttl: expires_at.timestamp(),
        };
        store
            .put(to_document(&record, &ResetToken::key(&token))?, Condition::NotExists)
            .await?;
        tracing::info!("Issued password reset token for member {}", member.user_id);

        match mailer {
            Some(mailer) => {
                let link = format!(
                    "{}/reset-password?token={}",
                    config.frontend_url.trim_end_matches('/'),
                    token
                );
                if let Err(e) = mailer.send_password_reset(&member.email, &link).await {
                    tracing::error!("Password reset mail failed: {}", e);
                }
            }
            None => tracing::warn!("MAIL_FROM is not set, reset mail skipped"),
        }
    }

    ok(&json!({ "message": FORGOT_PASSWORD_MESSAGE }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: Option<String>,
    pub new_password: Option<String>,
}

/// POST /auth/reset-password
pub async fn reset_password(store: &dyn Store, body: &[u8]) -> ApiResult<Response<Body>> {
    let req: ResetPasswordRequest = parse_body(body)?;
    let (Some(token), Some(new_password)) = (req.token, req.new_password) else {
        return Err(ApiError::BadRequest(
            "Token and new password are required".to_string(),
        ));
    };
    validate_new_password(&new_password)?;

    let key = ResetToken::key(&token);
    let Some(item) = store.get(&key).await? else {
        return Err(ApiError::BadRequest(INVALID_RESET_TOKEN.to_string()));
    };
    let record: ResetToken = from_document(item)?;

    // single use: only one caller wins the conditional delete
    match store.delete(&key, Condition::Exists).await {
        Ok(()) => {}
        Err(StoreError::ConditionFailed) => {
            return Err(ApiError::BadRequest(INVALID_RESET_TOKEN.to_string()))
        }
        Err(e) => return Err(e.into()),
    }

    if record.expires_at <= Utc::now() {
        tracing::warn!("Expired reset token used for member {}", record.user_id);
        return Err(ApiError::BadRequest(INVALID_RESET_TOKEN.to_string()));
    }

    let update = Throttle::for_user(&record.user_id)
        .reset()
        .set("authentication.passwordHash", hash_password(&new_password)?)
        .set("metadata.updatedAt", Utc::now().to_rfc3339());

    match store.update(update).await {
        Ok(_) => {}
        Err(StoreError::ConditionFailed) => {
            return Err(ApiError::BadRequest(INVALID_RESET_TOKEN.to_string()))
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!("Password reset for member {}", record.user_id);
    ok(&json!({ "message": "Password has been reset successfully" }))
}
