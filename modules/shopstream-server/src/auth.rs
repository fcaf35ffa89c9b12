//! User tokens: issued on registration, required on the per-user routes.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::state::UsersState;

const TOKEN_DURATION_SECS: i64 = 24 * 3600;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub user_id: String,
    pub exp: i64,
    pub iat: i64,
}

/// HS256 signing and verification with one shared secret.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn create_token(&self, user_id: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now();
        let claims = Claims {
            user_id: user_id.to_string(),
            exp: (now + chrono::Duration::seconds(TOKEN_DURATION_SECS)).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
    }

    /// Valid signature and not expired.
    pub fn verify_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
    }
}

/// The user a request's token was issued to. Accepts `Authorization:
/// Bearer <token>` or the bare token.
pub struct AuthenticatedUser {
    pub user_id: String,
}

impl AuthenticatedUser {
    /// Tokens only grant access to their own user.
    pub fn require(&self, user_id: &str) -> Result<(), Response> {
        if self.user_id == user_id {
            return Ok(());
        }
        Err(reject(
            StatusCode::FORBIDDEN,
            "Token does not grant access to this user",
        ))
    }
}

impl FromRequestParts<UsersState> for AuthenticatedUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &UsersState,
    ) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        else {
            return Err(reject(
                StatusCode::UNAUTHORIZED,
                "Authorization header missing",
            ));
        };

        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
        match state.jwt.verify_token(token) {
            Ok(claims) => Ok(AuthenticatedUser {
                user_id: claims.user_id,
            }),
            Err(_) => Err(reject(StatusCode::UNAUTHORIZED, "Invalid token")),
        }
    }
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_token() {
        let svc = JwtService::new("test-secret-key");
        let token = svc.create_token("u1").unwrap();
        let claims = svc.verify_token(&token).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn rejects_wrong_secret_and_garbage() {
        let token = JwtService::new("secret-a").create_token("u1").unwrap();
        assert!(JwtService::new("secret-b").verify_token(&token).is_err());
        assert!(JwtService::new("secret-a").verify_token("garbage").is_err());
    }

    #[test]
    fn token_is_scoped_to_its_user() {
        let user = AuthenticatedUser {
            user_id: "u1".into(),
        };
        assert!(user.require("u1").is_ok());
        let denied = user.require("u2").unwrap_err();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    }
}
