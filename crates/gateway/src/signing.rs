use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("signed URL has expired")]
    Expired,
    #[error("signature is not valid")]
    Invalid,
    #[error("token was issued for a different object")]
    WrongObject,
    #[error("could not sign URL: {0}")]
    Encode(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct UrlClaims {
    /// `<bucket>/<path>`
    url: String,
    iat: i64,
    exp: i64,
    /// `exp` in milliseconds; `exp` alone would cut up to a second off the window.
    exp_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignedUrl {
    #[serde(rename = "signedUrl")]
    pub signed_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and checks short-lived links to stored objects.
///
/// Tokens are HS256 JWTs bound to one `<bucket>/<path>`; expiry is checked
/// against the caller-supplied clock with no leeway.
pub struct UrlSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl UrlSigner {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn sign(&self, bucket: &str, path: &str, now: DateTime<Utc>) -> Result<SignedUrl, SigningError> {
        let expires_at = now + self.ttl;
        let claims = UrlClaims {
            url: format!("{}/{}", bucket, path),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            exp_ms: expires_at.timestamp_millis(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| SigningError::Encode(e.to_string()))?;

        Ok(SignedUrl {
            signed_url: format!("/storage/v1/object/sign/{}/{}?token={}", bucket, path, token),
            expires_at,
        })
    }

    pub fn verify(
        &self,
        bucket: &str,
        path: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SigningError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<UrlClaims>(token, &self.decoding, &validation)
            .map_err(|_| SigningError::Invalid)?;

        if data.claims.url != format!("{}/{}", bucket, path) {
            return Err(SigningError::WrongObject);
        }
        if now.timestamp_millis() >= data.claims.exp_ms {
            return Err(SigningError::Expired);
        }
        Ok(())
    }
}
