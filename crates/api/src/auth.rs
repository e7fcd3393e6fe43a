use beacon_config::JwtSettings;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Claims minted by the identity service; this API only verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

pub struct AuthService {
    jwt_settings: JwtSettings,
    decoding_key: DecodingKey,
}

impl AuthService {
    pub fn new(jwt_settings: JwtSettings) -> Self {
        let decoding_key = DecodingKey::from_secret(jwt_settings.secret.as_bytes());
        Self {
            jwt_settings,
            decoding_key,
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.jwt_settings.issuer]);

        let token_data =
            decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn settings() -> JwtSettings {
        JwtSettings {
            secret: "test-secret".to_string(),
            issuer: "beacon".to_string(),
        }
    }

    fn token(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_a_valid_token() {
        let auth = AuthService::new(settings());
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: bson::oid::ObjectId::new().to_hex(),
            iat: now,
            exp: now + 3600,
            iss: "beacon".to_string(),
        };
        let verified = auth.verify_token(&token(&claims, "test-secret")).unwrap();
        assert_eq!(verified.sub, claims.sub);
    }

    #[test]
    fn rejects_expired_and_forged_tokens() {
        let auth = AuthService::new(settings());
        let now = chrono::Utc::now().timestamp();
        let expired = Claims {
            sub: "x".to_string(),
            iat: now - 7200,
            exp: now - 3600,
            iss: "beacon".to_string(),
        };
        assert!(matches!(
            auth.verify_token(&token(&expired, "test-secret")),
            Err(AuthError::TokenExpired)
        ));

        let forged = Claims {
            sub: "x".to_string(),
            iat: now,
            exp: now + 3600,
            iss: "beacon".to_string(),
        };
        assert!(matches!(
            auth.verify_token(&token(&forged, "wrong-secret")),
            Err(AuthError::InvalidToken(_))
        ));
    }
}
