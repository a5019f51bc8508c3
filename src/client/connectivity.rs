//! Concrete collaborators for the CLI session store: the HTTP auth endpoint,
//! a file-per-key store under a profile directory, a cookie-header holder,
//! and a navigator that just remembers where the client was last sent.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};

use crate::identity::{LoginReply, Role, ROLE_COOKIE};

use super::session_store::{AuthApi, CookieJar, KvStore, LoginAttempt, Navigator};

pub struct HttpAuthApi {
    base: String,
    client: reqwest::blocking::Client,
}

impl HttpAuthApi {
    pub fn new(base: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder().cookie_store(true).build()?;
        Ok(Self { base: base.trim_end_matches('/').to_string(), client })
    }
}

impl AuthApi for HttpAuthApi {
    fn login(&self, attempt: &LoginAttempt) -> Result<LoginReply> {
        let resp = self
            .client
            .post(format!("{}/login", self.base))
            .json(&serde_json::json!({
                "username": attempt.username,
                "password": attempt.password,
                "role": attempt.claimed_role,
            }))
            .send()
            .context("login request failed")?;
        // 401 still carries a LoginReply body with the message
        let reply: LoginReply = resp.json().context("login response was not valid JSON")?;
        Ok(reply)
    }

    fn logout(&self, token: &str) -> Result<()> {
        self.client
            .post(format!("{}/logout", self.base))
            .bearer_auth(token)
            .send()
            .context("logout request failed")?;
        Ok(())
    }
}

/// One file per key under a profile directory.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self { dir: dir.as_ref().to_path_buf() })
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.dir.join(key)).ok()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        std::fs::write(self.dir.join(key), value)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        let _ = std::fs::remove_file(self.dir.join(key));
    }
}

/// Accumulates the `Cookie` header value sent with navigations. Shared via
/// `Rc` so the CLI can read it back after the store consumed the jar.
#[derive(Clone, Default)]
pub struct HeaderCookieJar {
    value: Rc<RefCell<Option<String>>>,
}

impl HeaderCookieJar {
    pub fn cookie_header(&self) -> Option<String> {
        self.value.borrow().clone()
    }
}

impl CookieJar for HeaderCookieJar {
    fn set_role_cookie(&mut self, role: Role) {
        let blob = serde_json::json!({ "role": role.as_str() }).to_string();
        *self.value.borrow_mut() = Some(format!("{}={}", ROLE_COOKIE, urlencoding::encode(&blob)));
    }

    fn clear_role_cookie(&mut self) {
        *self.value.borrow_mut() = None;
    }
}

/// Remembers the route the session store last sent the client to.
#[derive(Clone, Default)]
pub struct RecordingNavigator {
    route: Rc<RefCell<Option<String>>>,
}

impl RecordingNavigator {
    pub fn current_route(&self) -> Option<String> {
        self.route.borrow().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn goto(&mut self, route: &str) {
        *self.route.borrow_mut() = Some(route.to_string());
    }
}
