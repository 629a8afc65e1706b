use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

const ISSUER: &str = "mealgate";

/// Role claim embedded at mint time. A point-in-time snapshot of the admin
/// allow-list; the admin gate re-checks the live list on admin routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ADMIN")]
    Admin,
    #[serde(rename = "USER")]
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the local user id.
    pub sub: String,
    /// Unique token identifier, keys the session registry entry.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub role: Role,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: String,
    pub jti: String,
    pub expires_in: Duration,
}

/// Token failures stay distinct internally so callers can log the kind, but
/// every one of them surfaces to the client as 401.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("malformed token")]
    Malformed,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match e.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            _ => Self::Malformed,
        }
    }
}

/// Mints and verifies the HS256 bearer credentials. Owns the signing key for
/// the process lifetime; the key is the SHA-256 digest of the configured
/// secret, never the raw secret bytes.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let key = Sha256::digest(secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.validate_exp = true;
        // session TTLs are aligned exactly with token expiry, so no leeway
        validation.leeway = 0;
        validation.required_spec_claims =
            ["sub", "exp", "iat"].into_iter().map(String::from).collect();

        Self {
            encoding_key: EncodingKey::from_secret(key.as_slice()),
            decoding_key: DecodingKey::from_secret(key.as_slice()),
            validation,
            ttl,
        }
    }

    pub fn mint(&self, user_id: i64, role: Role) -> Result<MintedToken, TokenError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
            iss: ISSUER.to_string(),
            role,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| TokenError::Malformed)?;

        Ok(MintedToken {
            token,
            jti: claims.jti,
            expires_in: self.ttl,
        })
    }

    /// Full verification: signature and expiry are checked before any claim
    /// is trusted.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// Pulls the jti out of a token without verifying the signature. Only
    /// ever used to key a session lookup; the lookup itself re-validates
    /// ownership, and access is never granted on the strength of an
    /// unverified token.
    pub fn extract_identifier(&self, token: &str) -> Result<String, TokenError> {
        let mut relaxed = Validation::new(Algorithm::HS256);
        relaxed.insecure_disable_signature_validation();
        relaxed.validate_exp = false;
        relaxed.required_spec_claims.clear();

        let data = decode::<Claims>(token, &self.decoding_key, &relaxed)
            .map_err(|_| TokenError::Malformed)?;
        Ok(data.claims.jti)
    }
}
