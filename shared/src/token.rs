//! HS256 bearer tokens.
//!
//! Tokens are compact JWTs (`header.payload.signature`, base64url without
//! padding) signed with the server-side `JWT_SECRET`. Nothing here is ever
//! computed on the client.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const MEMBER_ACCESS_TTL_HOURS: i64 = 24;
pub const MEMBER_REFRESH_TTL_DAYS: i64 = 7;
pub const ADMIN_ACCESS_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Administrator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(
        sub: impl Into<String>,
        email: Option<String>,
        role: Role,
        kind: TokenKind,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            sub: sub.into(),
            email,
            role,
            kind,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("failed to encode token: {0}")]
    Encode(String),
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

fn mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size")
}

/// Sign claims into a compact token
pub fn sign(claims: &Claims, secret: &str) -> Result<String, TokenError> {
    let header = Header {
        alg: "HS256".to_string(),
        typ: "JWT".to_string(),
    };
    let header = serde_json::to_vec(&header).map_err(|e| TokenError::Encode(e.to_string()))?;
    let payload = serde_json::to_vec(claims).map_err(|e| TokenError::Encode(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );

    let mut mac = mac(secret);
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature))
}

/// Check signature and expiry, returning the claims
pub fn verify(token: &str, secret: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| TokenError::Malformed)?;
    let parsed: Header = serde_json::from_slice(&header_bytes).map_err(|_| TokenError::Malformed)?;
    if parsed.alg != "HS256" {
        return Err(TokenError::Malformed);
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Malformed)?;
    let mut mac = mac(secret);
    mac.update(format!("{}.{}", header, payload).as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| TokenError::BadSignature)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::Malformed)?;
    let claims: Claims = serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

    if claims.exp <= now.timestamp() {
        return Err(TokenError::Expired);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn claims(now: DateTime<Utc>) -> Claims {
        Claims::new(
            "user-1",
            Some("taro@example.com".to_string()),
            Role::Member,
            TokenKind::Access,
            now,
            Duration::hours(MEMBER_ACCESS_TTL_HOURS),
        )
    }

    #[test]
    fn test_sign_and_verify() {
        let now = Utc::now();
        let token = sign(&claims(now), SECRET).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let verified = verify(&token, SECRET, now).unwrap();
        assert_eq!(verified.sub, "user-1");
        assert_eq!(verified.exp - verified.iat, 24 * 3600);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let now = Utc::now();
        let token = sign(&claims(now), SECRET).unwrap();
        assert_eq!(verify(&token, "other", now), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let now = Utc::now();
        let token = sign(&claims(now), SECRET).unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let mut forged = claims(now);
        forged.role = Role::Administrator;
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let forged_token = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(verify(&forged_token, SECRET, now), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_expired_token() {
        let issued = Utc::now() - Duration::hours(25);
        let token = sign(&claims(issued), SECRET).unwrap();
        assert_eq!(verify(&token, SECRET, Utc::now()), Err(TokenError::Expired));
    }

    #[test]
    fn test_unsigned_base64_blob_is_malformed() {
        let blob = URL_SAFE_NO_PAD.encode(br#"{"sub":"admin","role":"administrator"}"#);
        assert_eq!(verify(&blob, SECRET, Utc::now()), Err(TokenError::Malformed));
    }
}
