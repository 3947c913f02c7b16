//! JWT token generation and validation.
//!
//! Access and refresh tokens are signed with independent secrets and
//! different algorithms, so a leaked access key cannot mint refresh tokens.
//! Expiry is checked against the caller's clock rather than inside
//! `jsonwebtoken`, which keeps "bad signature" and "expired" distinguishable.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Algorithm for short-lived access tokens.
pub const ACCESS_ALGORITHM: Algorithm = Algorithm::HS256;

/// Algorithm for long-lived refresh tokens.
pub const REFRESH_ALGORITHM: Algorithm = Algorithm::HS512;

/// Default access token duration: 15 minutes
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;

/// Default refresh token duration: 2 weeks
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 14 * 24 * 60 * 60;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims for access tokens (stateless).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (identity id)
    pub sub: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub iat: u64,
    pub exp: u64,
}

/// JWT claims for refresh tokens. The `jti` makes every issued value unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub jti: String,
    /// Subject (identity id)
    pub sub: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub iat: u64,
    pub exp: u64,
}

trait TokenClaims: DeserializeOwned + Clone {
    fn token_type(&self) -> TokenType;
    fn expires_at(&self) -> u64;
}

impl TokenClaims for AccessClaims {
    fn token_type(&self) -> TokenType {
        self.token_type
    }
    fn expires_at(&self) -> u64 {
        self.exp
    }
}

impl TokenClaims for RefreshClaims {
    fn token_type(&self) -> TokenType {
        self.token_type
    }
    fn expires_at(&self) -> u64 {
        self.exp
    }
}

/// Result of generating an access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub issued_at: u64,
    pub expires_at: u64,
    /// Token duration in seconds
    pub duration: u64,
}

/// Result of generating a refresh token.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub token: String,
    pub jti: String,
    pub issued_at: u64,
    pub expires_at: u64,
    /// Token duration in seconds
    pub duration: u64,
}

#[derive(Clone)]
struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    ttl: u64,
}

impl SigningKeys {
    fn new(secret: &[u8], algorithm: Algorithm, ttl: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            algorithm,
            ttl,
        }
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        jsonwebtoken::encode(&Header::new(self.algorithm), claims, &self.encoding)
            .map_err(JwtError::Encoding)
    }

    fn verify<T: TokenClaims>(
        &self,
        token: &str,
        expected: TokenType,
        now: u64,
    ) -> Result<T, JwtError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = jsonwebtoken::decode::<T>(token, &self.decoding, &validation)
            .map_err(JwtError::InvalidSignature)?
            .claims;

        if claims.token_type() != expected {
            return Err(JwtError::WrongTokenType);
        }

        if now >= claims.expires_at() {
            return Err(JwtError::Expired);
        }

        Ok(claims)
    }
}

/// Signs and verifies both token kinds.
#[derive(Clone)]
pub struct TokenCodec {
    access: SigningKeys,
    refresh: SigningKeys,
}

impl TokenCodec {
    pub fn new(access_secret: &[u8], access_ttl: u64, refresh_secret: &[u8], refresh_ttl: u64) -> Self {
        Self {
            access: SigningKeys::new(access_secret, ACCESS_ALGORITHM, access_ttl),
            refresh: SigningKeys::new(refresh_secret, REFRESH_ALGORITHM, refresh_ttl),
        }
    }

    pub fn access_ttl(&self) -> u64 {
        self.access.ttl
    }

    pub fn refresh_ttl(&self) -> u64 {
        self.refresh.ttl
    }

    /// Generate an access token for a subject.
    pub fn issue_access(&self, subject_id: &str, now: u64) -> Result<AccessToken, JwtError> {
        let exp = now.saturating_add(self.access.ttl);
        let claims = AccessClaims {
            sub: subject_id.to_string(),
            token_type: TokenType::Access,
            iat: now,
            exp,
        };

        Ok(AccessToken {
            token: self.access.sign(&claims)?,
            issued_at: now,
            expires_at: exp,
            duration: self.access.ttl,
        })
    }

    /// Generate a refresh token for a subject.
    pub fn issue_refresh(&self, subject_id: &str, now: u64) -> Result<RefreshToken, JwtError> {
        let jti = uuid::Uuid::new_v4().to_string();
        let exp = now.saturating_add(self.refresh.ttl);
        let claims = RefreshClaims {
            jti: jti.clone(),
            sub: subject_id.to_string(),
            token_type: TokenType::Refresh,
            iat: now,
            exp,
        };

        Ok(RefreshToken {
            token: self.refresh.sign(&claims)?,
            jti,
            issued_at: now,
            expires_at: exp,
            duration: self.refresh.ttl,
        })
    }

    /// Validate and decode an access token.
    pub fn verify_access(&self, token: &str, now: u64) -> Result<AccessClaims, JwtError> {
        self.access.verify(token, TokenType::Access, now)
    }

    /// Validate and decode a refresh token.
    pub fn verify_refresh(&self, token: &str, now: u64) -> Result<RefreshClaims, JwtError> {
        self.refresh.verify(token, TokenType::Refresh, now)
    }
}

/// Claims read from a token whose signature was NOT checked.
///
/// Holding one of these proves nothing about the caller. It exists only to
/// find the session an expired refresh token belonged to so it can be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedClaims {
    pub sub: String,
    pub exp: Option<u64>,
}

#[derive(Deserialize, Clone)]
struct RawClaims {
    sub: String,
    exp: Option<u64>,
}

/// Signature-less decoding, kept apart from [`TokenCodec`] so it can never be
/// reached through the verification path.
pub struct UnsafeDecode;

impl UnsafeDecode {
    pub fn claims(token: &str) -> Result<UnverifiedClaims, JwtError> {
        let raw = jsonwebtoken::dangerous::insecure_decode::<RawClaims>(token)
            .map_err(JwtError::Malformed)?
            .claims;

        Ok(UnverifiedClaims {
            sub: raw.sub,
            exp: raw.exp,
        })
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("failed to encode token: {0}")]
    Encoding(#[source] jsonwebtoken::errors::Error),
    #[error("invalid token: {0}")]
    InvalidSignature(#[source] jsonwebtoken::errors::Error),
    #[error("malformed token: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),
    #[error("token expired")]
    Expired,
    /// e.g. a refresh token presented where an access token was expected
    #[error("wrong token type")]
    WrongTokenType,
}
