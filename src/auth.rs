//! Username/password accounts and bearer-token sessions.
//!
//! Passwords are stored as `sha256$<salt hex>$<digest hex>` where the digest
//! is SHA-256 over the salt bytes followed by the password. Sessions are
//! opaque random tokens kept in memory, so a restart logs everyone out.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{DashError, Result};
use crate::models::UserAccount;
use crate::store;

const SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;
const TOKEN_LEN: usize = 32;

fn digest(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill(&mut salt);
    format!("{SCHEME}${}${}", hex::encode(salt), hex::encode(digest(&salt, password)))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(SCHEME), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
        return false;
    };
    constant_time_eq(&digest(&salt, password), &expected)
}

pub fn register_user(conn: &Connection, username: &str, password: &str, full_name: &str) -> Result<i64> {
    if password.is_empty() {
        return Err(DashError::InvalidInput("password must not be empty".to_string()));
    }
    let id = store::create_user(conn, username, &hash_password(password), full_name)?;
    info!(%username, id, "user created");
    Ok(id)
}

/// Check credentials. Unknown users and wrong passwords look the same.
pub fn authenticate(conn: &Connection, username: &str, password: &str) -> Result<UserAccount> {
    match store::find_user_with_hash(conn, username)? {
        Some((user, stored)) if verify_password(password, &stored) => Ok(user),
        _ => {
            warn!(%username, "failed login");
            Err(DashError::Unauthorized)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub full_name: String,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn issue(&self, user: &UserAccount) -> (String, Session) {
        let mut bytes = [0u8; TOKEN_LEN];
        rand::thread_rng().fill(&mut bytes);
        let token = hex::encode(bytes);
        let session = Session {
            user_id: user.id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            expires_at: Utc::now() + self.ttl,
        };
        let mut sessions = self.sessions();
        sessions.retain(|_, s| s.expires_at > Utc::now());
        sessions.insert(token.clone(), session.clone());
        (token, session)
    }

    /// The live session for `token`; expired sessions are dropped.
    pub fn validate(&self, token: &str) -> Option<Session> {
        let mut sessions = self.sessions();
        match sessions.get(token) {
            Some(s) if s.expires_at > Utc::now() => Some(s.clone()),
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions().remove(token).is_some()
    }
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}
