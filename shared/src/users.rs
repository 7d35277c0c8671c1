//! Members: registration, lookup, listing and administration.
//!
//! A member is stored once under `USER#<id>`/`PROFILE` with `GSI1PK` set to
//! `EMAIL#<email>`. Registration also writes an `EMAIL#<email>`/`UNIQUE`
//! marker in the same transaction so two registrations for one address can
//! never both succeed.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use lambda_http::{Body, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{ApiError, ApiResult};
use crate::lockout::LoginState;
use crate::password::{hash_password, validate_new_password};
use crate::responses::{created, ok, parse_body};
use crate::store::{
    from_document, to_document, Condition, Document, Key, Store, StoreError, Update, GSI1PK,
};
use crate::token::Claims;

pub const WELCOME_POINTS: i64 = 1000;
pub const POINTS_VALIDITY_DAYS: i64 = 365;
pub const DEFAULT_PAGE_SIZE: i32 = 50;
const MAX_PAGE_SIZE: i32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name_kana: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name_kana: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub building: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    pub password_hash: String,
    #[serde(flatten)]
    pub login: LoginState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mfa_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Points {
    pub balance: i64,
    pub total_earned: i64,
    pub total_used: i64,
    pub expiry_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    #[serde(default)]
    pub total_reservations: u32,
    #[serde(default)]
    pub total_spent: f64,
    pub join_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notifications {
    pub email: bool,
    pub sms: bool,
    pub push: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub language: String,
    pub currency: String,
    pub notifications: Notifications,
    pub newsletter: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            language: "ja".to_string(),
            currency: "JPY".to_string(),
            notifications: Notifications {
                email: true,
                sms: false,
                push: true,
            },
            newsletter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: String,
    pub email: String,
    pub member_number: String,
    pub member_type: String,
    pub status: MemberStatus,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub driver_license: Document,
    pub authentication: Authentication,
    pub points: Points,
    pub statistics: Statistics,
    #[serde(default)]
    pub preferences: Preferences,
    pub metadata: Metadata,
}

impl Member {
    pub fn new(
        email: String,
        password_hash: String,
        profile: Profile,
        address: Address,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: uuid::Uuid::new_v4().to_string(),
            email,
            member_number: member_number(now),
            member_type: "regular".to_string(),
            status: MemberStatus::Active,
            profile,
            address,
            driver_license: Document::new(),
            authentication: Authentication {
                password_hash,
                login: LoginState::default(),
                last_login: None,
                mfa_enabled: false,
            },
            points: Points {
                balance: WELCOME_POINTS,
                total_earned: WELCOME_POINTS,
                total_used: 0,
                expiry_date: now + Duration::days(POINTS_VALIDITY_DAYS),
            },
            statistics: Statistics {
                total_reservations: 0,
                total_spent: 0.0,
                join_date: now,
            },
            preferences: Preferences::default(),
            metadata: Metadata {
                created_at: now,
                updated_at: now,
                created_by: "system".to_string(),
                version: 1,
            },
        }
    }

    pub fn key(user_id: &str) -> Key {
        Key::new(format!("USER#{}", user_id), "PROFILE")
    }

    pub fn email_key(email: &str) -> Key {
        Key::new(format!("EMAIL#{}", email), "UNIQUE")
    }

    pub fn to_item(&self) -> Result<Document, StoreError> {
        let mut item = to_document(self, &Member::key(&self.user_id))?;
        item.insert(GSI1PK.to_string(), Value::String(format!("EMAIL#{}", self.email)));
        Ok(item)
    }

    pub fn from_item(item: Document) -> Result<Self, StoreError> {
        from_document(item)
    }

    /// Response representation without credentials
    pub fn public(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(auth) = value
            .get_mut("authentication")
            .and_then(Value::as_object_mut)
        {
            auth.remove("passwordHash");
        }
        value
    }
}

/// `M` followed by the last six digits of the epoch milliseconds
fn member_number(now: DateTime<Utc>) -> String {
    format!("M{:06}", now.timestamp_millis().rem_euclid(1_000_000))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn load(store: &dyn Store, user_id: &str) -> ApiResult<Option<Member>> {
    match store.get(&Member::key(user_id)).await? {
        Some(item) => Ok(Some(Member::from_item(item)?)),
        None => Ok(None),
    }
}

pub async fn find_by_email(store: &dyn Store, email: &str) -> ApiResult<Option<Member>> {
    let items = store
        .query_index(&format!("EMAIL#{}", normalize_email(email)))
        .await?;
    match items
        .into_iter()
        .find(|item| item.get("SK").and_then(Value::as_str) == Some("PROFILE"))
    {
        Some(item) => Ok(Some(Member::from_item(item)?)),
        None => Ok(None),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub address: Option<Address>,
}

/// POST /users
pub async fn register(store: &dyn Store, body: &[u8]) -> ApiResult<Response<Body>> {
    let req: RegisterRequest = parse_body(body)?;
    let (Some(email), Some(password)) = (req.email, req.password) else {
        return Err(ApiError::BadRequest(
            "Email and password are required".to_string(),
        ));
    };

    let email = normalize_email(&email);
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required".to_string()));
    }
    validate_new_password(&password)?;

    let member = Member::new(
        email.clone(),
        hash_password(&password)?,
        req.profile.unwrap_or_default(),
        req.address.unwrap_or_default(),
        Utc::now(),
    );

    let marker = to_document(
        &json!({ "userId": member.user_id, "email": email }),
        &Member::email_key(&email),
    )?;

    match store
        .put_all(vec![
            (member.to_item()?, Condition::NotExists),
            (marker, Condition::NotExists),
        ])
        .await
    {
        Ok(()) => {}
        Err(StoreError::ConditionFailed) => {
            tracing::warn!("Registration rejected, email already in use");
            return Err(ApiError::Conflict("Email already exists".to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!("Registered member {}", member.user_id);
    created(&json!({
        "message": "User created successfully",
        "user": member.public(),
    }))
}

/// GET /users/{id}: the member themself or an administrator
pub async fn get_user(store: &dyn Store, claims: &Claims, user_id: &str) -> ApiResult<Response<Body>> {
    if !claims.is_admin() && claims.sub != user_id {
        return Err(ApiError::Forbidden(
            "You can only view your own account".to_string(),
        ));
    }
    match load(store, user_id).await? {
        Some(member) => ok(&member.public()),
        None => Err(ApiError::NotFound("User not found".to_string())),
    }
}

/// GET /users?email=
pub async fn get_user_by_email(store: &dyn Store, email: &str) -> ApiResult<Response<Body>> {
    match find_by_email(store, email).await? {
        Some(member) => ok(&member.public()),
        None => Err(ApiError::NotFound("User not found".to_string())),
    }
}

#[derive(Debug, Default)]
pub struct ListUsersQuery {
    pub limit: Option<i32>,
    pub next_token: Option<String>,
    pub member_type: Option<String>,
    pub status: Option<String>,
}

impl ListUsersQuery {
    fn matches(&self, member: &Member) -> bool {
        let type_ok = self
            .member_type
            .as_deref()
            .map_or(true, |t| member.member_type == t);
        let status_ok = self.status.as_deref().map_or(true, |s| {
            serde_json::to_value(member.status).ok().as_ref().and_then(Value::as_str) == Some(s)
        });
        type_ok && status_ok
    }
}

pub fn encode_cursor(key: &Key) -> ApiResult<String> {
    let raw = serde_json::to_vec(key).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(STANDARD.encode(raw))
}

pub fn decode_cursor(token: &str) -> ApiResult<Key> {
    STANDARD
        .decode(token)
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .ok_or_else(|| ApiError::BadRequest("Invalid nextToken".to_string()))
}

/// GET /users: one page of a table scan, filtered like a scan FilterExpression
pub async fn list_users(store: &dyn Store, query: &ListUsersQuery) -> ApiResult<Response<Body>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if limit < 1 || limit > MAX_PAGE_SIZE {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    let start = query.next_token.as_deref().map(decode_cursor).transpose()?;

    let page = store.scan("USER#", limit, start).await?;
    let users: Vec<Value> = page
        .items
        .into_iter()
        .map(Member::from_item)
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .filter(|member| query.matches(member))
        .map(Member::public)
        .collect();

    let mut payload = json!({ "users": users, "count": users.len() });
    if let Some(last_key) = page.last_key {
        payload["nextToken"] = Value::String(encode_cursor(&last_key)?);
    }
    ok(&payload)
}

async fn all_members(store: &dyn Store) -> ApiResult<Vec<Member>> {
    let mut members = Vec::new();
    let mut start = None;
    loop {
        let page = store.scan("USER#", 100, start).await?;
        for item in page.items {
            members.push(Member::from_item(item)?);
        }
        match page.last_key {
            Some(key) => start = Some(key),
            None => break,
        }
    }
    Ok(members)
}

/// GET /members
pub async fn list_members(store: &dyn Store, query: &ListUsersQuery) -> ApiResult<Response<Body>> {
    let mut members: Vec<Member> = all_members(store)
        .await?
        .into_iter()
        .filter(|member| query.matches(member))
        .collect();
    members.sort_by(|a, b| b.metadata.created_at.cmp(&a.metadata.created_at));

    let members: Vec<Value> = members.iter().map(Member::public).collect();
    ok(&json!({ "members": members, "count": members.len() }))
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing)]
    pub points: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MemberStatus>,
}

/// PUT /members/{id}
pub async fn update_member(store: &dyn Store, user_id: &str, body: &[u8]) -> ApiResult<Response<Body>> {
    let patch: MemberUpdate = parse_body(body)?;

    let mut update = Update::new(Member::key(user_id)).set_fields(&patch)?;
    if let Some(points) = patch.points {
        if points < 0 {
            return Err(ApiError::BadRequest("points must not be negative".to_string()));
        }
        update = update.set("points.balance", points);
    }
    if update.is_empty() {
        return Err(ApiError::BadRequest("No updatable fields provided".to_string()));
    }

    let update = update
        .set("metadata.updatedAt", Utc::now().to_rfc3339())
        .increment("metadata.version", 1)
        .when(Condition::Exists);

    let item = match store.update(update).await {
        Ok(item) => item,
        Err(StoreError::ConditionFailed) => {
            return Err(ApiError::NotFound("Member not found".to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!("Updated member {}", user_id);
    ok(&json!({
        "message": "Member updated successfully",
        "member": Member::from_item(item)?.public(),
    }))
}

/// DELETE /members/{id}: deactivates, the record is kept
pub async fn deactivate_member(store: &dyn Store, user_id: &str) -> ApiResult<Response<Body>> {
    let update = Update::new(Member::key(user_id))
        .set("status", "inactive")
        .set("metadata.updatedAt", Utc::now().to_rfc3339())
        .when(Condition::Exists);

    match store.update(update).await {
        Ok(_) => {
            tracing::info!("Deactivated member {}", user_id);
            ok(&json!({ "message": "Member deactivated successfully" }))
        }
        Err(StoreError::ConditionFailed) => Err(ApiError::NotFound("Member not found".to_string())),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::token::{Role, TokenKind};
    use lambda_http::http::StatusCode;

    fn body_of(resp: &Response<Body>) -> Value {
        serde_json::from_slice(resp.body()).unwrap()
    }

    fn registration(email: &str) -> Vec<u8> {
        json!({
            "email": email,
            "password": "s3cret-pass",
            "profile": {"firstName": "Taro", "lastName": "Yamada"}
        })
        .to_string()
        .into_bytes()
    }

    fn claims(sub: &str, role: Role) -> Claims {
        Claims::new(sub, None, role, TokenKind::Access, Utc::now(), Duration::hours(1))
    }

    #[tokio::test]
    async fn test_register_applies_defaults() {
        let store = MemoryStore::new();
        let resp = register(&store, &registration("Taro@Example.com ")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let user = body_of(&resp)["user"].clone();
        assert_eq!(user["email"], "taro@example.com");
        assert_eq!(user["memberType"], "regular");
        assert_eq!(user["status"], "active");
        assert_eq!(user["points"]["balance"], 1000);
        assert_eq!(user["preferences"]["language"], "ja");
        assert_eq!(user["preferences"]["currency"], "JPY");
        assert!(user["memberNumber"].as_str().unwrap().starts_with('M'));
        assert_eq!(user["memberNumber"].as_str().unwrap().len(), 7);
        assert!(user["authentication"].get("passwordHash").is_none());

        // profile item plus the email marker
        assert_eq!(store.len(), 2);
        let found = find_by_email(&store, "taro@example.com").await.unwrap().unwrap();
        assert!(found.authentication.password_hash.starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        register(&store, &registration("a@example.com")).await.unwrap();

        let err = register(&store, &registration("A@example.com")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_registration() {
        let store = MemoryStore::new();
        let first = registration("race@example.com");
        let second = registration("race@example.com");
        let (a, b) = tokio::join!(register(&store, &first), register(&store, &second));

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let users = store.query_index("EMAIL#race@example.com").await.unwrap();
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let store = MemoryStore::new();
        let missing = register(&store, br#"{"email":"a@example.com"}"#).await.unwrap_err();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let weak = register(&store, br#"{"email":"a@example.com","password":"123"}"#)
            .await
            .unwrap_err();
        assert_eq!(weak.status(), StatusCode::BAD_REQUEST);

        let empty = register(&store, b"").await.unwrap_err();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_get_user_requires_self_or_admin() {
        let store = MemoryStore::new();
        register(&store, &registration("self@example.com")).await.unwrap();
        let member = find_by_email(&store, "self@example.com").await.unwrap().unwrap();

        let own = get_user(&store, &claims(&member.user_id, Role::Member), &member.user_id)
            .await
            .unwrap();
        assert_eq!(body_of(&own)["userId"], member.user_id);

        let other = get_user(&store, &claims("someone-else", Role::Member), &member.user_id)
            .await
            .unwrap_err();
        assert_eq!(other.status(), StatusCode::FORBIDDEN);

        let missing = get_user(&store, &claims("admin", Role::Administrator), "nope")
            .await
            .unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_users_paginates() {
        let store = MemoryStore::new();
        for i in 0..3 {
            register(&store, &registration(&format!("user{}@example.com", i)))
                .await
                .unwrap();
        }

        let mut seen = 0;
        let mut next_token = None;
        loop {
            let query = ListUsersQuery {
                limit: Some(2),
                next_token: next_token.take(),
                ..Default::default()
            };
            let body = body_of(&list_users(&store, &query).await.unwrap());
            seen += body["users"].as_array().unwrap().len();
            match body.get("nextToken").and_then(Value::as_str) {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        assert_eq!(seen, 3);

        let bad = ListUsersQuery {
            next_token: Some("!!".to_string()),
            ..Default::default()
        };
        assert_eq!(
            list_users(&store, &bad).await.unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_update_and_deactivate_member() {
        let store = MemoryStore::new();
        register(&store, &registration("m@example.com")).await.unwrap();
        let member = find_by_email(&store, "m@example.com").await.unwrap().unwrap();

        let resp = update_member(
            &store,
            &member.user_id,
            br#"{"points": 2500, "memberType": "premium", "address": {"city": "Naha"}}"#,
        )
        .await
        .unwrap();
        let updated = body_of(&resp)["member"].clone();
        assert_eq!(updated["points"]["balance"], 2500);
        assert_eq!(updated["points"]["totalEarned"], 1000);
        assert_eq!(updated["memberType"], "premium");
        assert_eq!(updated["address"]["city"], "Naha");
        assert_eq!(updated["metadata"]["version"], 2);

        deactivate_member(&store, &member.user_id).await.unwrap();
        let member = load(&store, &member.user_id).await.unwrap().unwrap();
        assert_eq!(member.status, MemberStatus::Inactive);

        let query = ListUsersQuery {
            status: Some("active".to_string()),
            ..Default::default()
        };
        let listed = body_of(&list_members(&store, &query).await.unwrap());
        assert_eq!(listed["count"], 0);

        let missing = deactivate_member(&store, "ghost").await.unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let empty = update_member(&store, &member.user_id, b"{}").await.unwrap_err();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    }
}
