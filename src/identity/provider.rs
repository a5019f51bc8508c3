use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppError;
use crate::security;

use super::principal::{Attrs, Principal, Role};
use super::session::{Session, SessionManager};

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// The role the caller claims to hold. Advisory only: the stored role is
    /// what ends up in the session and the cookie.
    pub claimed_role: Option<Role>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub session: Session,
}

/// Wire shape of the login exchange: what `POST /login` returns and what the
/// client-side session store consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Principal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub trait AuthProvider: Send + Sync {
    fn login(&self, req: &LoginRequest) -> Result<LoginResponse>;
}

/// Verifies credentials against the local user store and issues sessions.
pub struct LocalAuthProvider {
    pub db_root: String,
    pub sessions: Arc<SessionManager>,
}

impl LocalAuthProvider {
    pub fn new(db_root: String, sessions: Arc<SessionManager>) -> Self {
        Self { db_root, sessions }
    }
}

impl AuthProvider for LocalAuthProvider {
    fn login(&self, req: &LoginRequest) -> Result<LoginResponse> {
        if !security::authenticate(&self.db_root, &req.username, &req.password)? {
            return Err(AppError::auth("invalid_credentials", "invalid credentials").into());
        }
        let Some(user) = security::find_user(&self.db_root, &req.username)? else {
            // Row vanished between the two reads; indistinguishable from a bad login
            return Err(AppError::auth("invalid_credentials", "invalid credentials").into());
        };
        if let Some(claimed) = req.claimed_role {
            if claimed != user.role {
                warn!(
                    target: "auth",
                    user = %req.username,
                    claimed = %claimed,
                    actual = %user.role,
                    "claimed role mismatch; using stored role"
                );
            }
        }
        let principal = Principal {
            user_id: user.username,
            role: user.role,
            display_name: user.display_name,
            attrs: Attrs { ip: req.ip.clone(), ..Default::default() },
        };
        let session = self.sessions.issue(principal);
        info!(target: "auth", user = %req.username, sid = %session.session_id, "login");
        Ok(LoginResponse { session })
    }
}
