//! Password hashing and bearer tokens for administrator sessions.
//!
//! Tokens are JSON Web Tokens signed with HMAC-SHA256 (`HS256`), carrying the id of the
//! authenticated user and an expiry time. Passwords are stored as Argon2id PHC strings with a
//! random per-user salt.

use crate::error::Error;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use clap::Args;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Authentication options.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Secret used to sign session tokens.
    #[clap(long, env = "COURIER_AUTH_SECRET")]
    pub auth_secret: String,

    /// How long a session token stays valid, in days.
    #[clap(long, env = "COURIER_TOKEN_TTL_DAYS", default_value = "7")]
    pub token_ttl_days: i64,
}

impl Options {
    pub fn keys(&self) -> Result<Keys, Error> {
        let ttl = Duration::try_days(self.token_ttl_days)
            .filter(|ttl| *ttl > Duration::zero())
            .ok_or_else(|| {
                Error::validation(format!("invalid token TTL {} days", self.token_ttl_days))
            })?;
        Ok(Keys::new(self.auth_secret.as_bytes(), ttl))
    }
}

/// The claims carried by a session token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The authenticated user.
    pub id: i32,
    /// Expiry, in seconds since the Unix epoch.
    pub exp: i64,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

const ALGORITHM: &str = "HS256";

impl Default for Header {
    fn default() -> Self {
        Self {
            alg: ALGORITHM.into(),
            typ: "JWT".into(),
        }
    }
}

/// Signing keys for session tokens.
#[derive(Clone)]
pub struct Keys {
    secret: Arc<[u8]>,
    ttl: Duration,
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys").field("ttl", &self.ttl).finish()
    }
}

impl Keys {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC is defined for keys of any length.
        <HmacSha256 as Mac>::new_from_slice(&self.secret).unwrap()
    }

    /// Issue a token for `user`.
    pub fn issue(&self, user: i32) -> Result<String, Error> {
        let exp = Utc::now()
            .checked_add_signed(self.ttl)
            .ok_or_else(|| Error::validation("token expiry out of range"))?;
        self.sign(&Claims {
            id: user,
            exp: exp.timestamp(),
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, Error> {
        let header = encode_json(&Header::default())?;
        let payload = encode_json(claims)?;
        let message = format!("{header}.{payload}");
        let mut mac = self.mac();
        mac.update(message.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{message}.{signature}"))
    }

    /// Check the signature and expiry of `token` and extract its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, Error> {
        let invalid = || Error::unauthorized("Token invalid");

        let (message, signature) = token.rsplit_once('.').ok_or_else(invalid)?;
        let (header, payload) = message.split_once('.').ok_or_else(invalid)?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;
        let mut mac = self.mac();
        mac.update(message.as_bytes());
        mac.verify_slice(&signature).map_err(|_| invalid())?;

        let header: Header = decode_json(header).ok_or_else(invalid)?;
        if header.alg != ALGORITHM {
            return Err(invalid());
        }
        let claims: Claims = decode_json(payload).ok_or_else(invalid)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(invalid());
        }
        Ok(claims)
    }
}

fn encode_json(value: &impl Serialize) -> Result<String, Error> {
    let json = serde_json::to_vec(value).map_err(|err| Error::validation(err.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_json<T: for<'de> Deserialize<'de>>(part: &str) -> Option<T> {
    let json = URL_SAFE_NO_PAD.decode(part).ok()?;
    serde_json::from_slice(&json).ok()
}

/// The password hasher.
///
/// Test builds use the cheapest parameters Argon2 allows. Hashes record their parameters, so
/// [`verify_password`] accepts hashes made with either.
fn hasher() -> Argon2<'static> {
    #[cfg(any(test, feature = "mocks"))]
    {
        use argon2::{Algorithm, Params, Version};
        let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, 1, None)
            .unwrap_or_default();
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    }
    #[cfg(not(any(test, feature = "mocks")))]
    {
        Argon2::default()
    }
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, Error> {
    let mut salt = [0; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let failed = |err: argon2::password_hash::Error| Error::Password {
        message: err.to_string(),
    };
    let salt = SaltString::encode_b64(&salt).map_err(failed)?;
    let hash = hasher()
        .hash_password(password.as_bytes(), &salt)
        .map_err(failed)?;
    Ok(hash.to_string())
}

/// Check `password` against a hash produced by [`hash_password`].
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(hash) = PasswordHash::new(hash) else {
        return false;
    };
    hasher()
        .verify_password(password.as_bytes(), &hash)
        .is_ok()
}
