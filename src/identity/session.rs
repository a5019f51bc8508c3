use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::RwLock;
use tracing::info;

use super::principal::Principal;

pub type SessionToken = String;

/// Lifetime of an issued session. Matches the role cookie's Max-Age so the
/// two expire together.
pub const SESSION_TTL_SECS: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub token: SessionToken,
    pub principal: Principal,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

/// 128-bit random token, base64url without padding.
pub fn opaque_token() -> String {
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// Owns the server-side session table. Shared through `AppState` as one
/// `Arc<SessionManager>`; all interior state is behind its own locks.
pub struct SessionManager {
    pub ttl: Duration,
    sessions: RwLock<HashMap<String, Session>>,
    user_index: RwLock<HashMap<String, HashSet<String>>>,
    revoked: RwLock<HashSet<String>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(SESSION_TTL_SECS),
            sessions: RwLock::new(HashMap::new()),
            user_index: RwLock::new(HashMap::new()),
            revoked: RwLock::new(HashSet::new()),
        }
    }
}

impl SessionManager {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, ..Self::default() }
    }

    pub fn issue(&self, principal: Principal) -> Session {
        let now = Instant::now();
        let sid = opaque_token();
        let token = opaque_token();
        let sess = Session {
            session_id: sid.clone(),
            token: token.clone(),
            principal: principal.clone(),
            issued_at: now,
            expires_at: now + self.ttl,
        };
        {
            let mut m = self.sessions.write();
            m.insert(token.clone(), sess.clone());
        }
        {
            let mut uidx = self.user_index.write();
            let set = uidx.entry(principal.user_id.clone()).or_insert_with(HashSet::new);
            set.insert(token);
        }
        info!(target: "session", user = %principal.user_id, sid = %sid, ttl_secs = self.ttl.as_secs(), "session issued");
        sess
    }

    pub fn validate(&self, token: &str) -> Option<Principal> {
        if self.revoked.read().contains(token) {
            return None;
        }
        let now = Instant::now();
        let mut drop_key: Option<String> = None;
        let out = {
            let map = self.sessions.read();
            if let Some(sess) = map.get(token) {
                if sess.expires_at > now {
                    Some(sess.principal.clone())
                } else {
                    drop_key = Some(token.to_string());
                    None
                }
            } else {
                None
            }
        };
        if let Some(k) = drop_key {
            self.sessions.write().remove(&k);
        }
        out
    }

    pub fn logout(&self, token: &str) -> bool {
        let mut removed = false;
        if let Some(sess) = self.sessions.write().remove(token) {
            removed = true;
            let uid = sess.principal.user_id;
            let mut idx = self.user_index.write();
            if let Some(set) = idx.get_mut(&uid) {
                set.remove(token);
            }
            self.revoked.write().insert(token.to_string());
        }
        removed
    }

    pub fn revoke_user(&self, user_id: &str) -> usize {
        let mut count = 0usize;
        if let Some(tokens) = self.user_index.read().get(user_id).cloned() {
            let mut s = self.sessions.write();
            let mut r = self.revoked.write();
            for t in tokens.iter() {
                if s.remove(t).is_some() {
                    count += 1;
                }
                r.insert(t.clone());
            }
        }
        info!(target: "session", user = %user_id, count = count, "sessions revoked");
        count
    }
}
