//! Client-held session state.
//!
//! The CLI keeps the authenticated identity the same way the web client did:
//! an opaque token plus the user record, persisted in a small key/value
//! store, with the role mirrored into a cookie so the server's route gate
//! can steer navigation before any authenticated call is made. All outside
//! effects go through injected collaborators, so the login/logout effect
//! ordering is testable without a server.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::identity::{landing_route, LoginReply, Principal, Role};

pub const KEY_TOKEN: &str = "token";
pub const KEY_USER: &str = "user";

/// The in-memory session for this process: token plus user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientSession {
    pub token: String,
    pub user: Principal,
}

#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub username: String,
    pub password: String,
    pub claimed_role: Option<Role>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// The server rejected the login, or returned an unusable response.
    /// Carries the one message shown to the user.
    #[error("{0}")]
    Authentication(String),
    #[error("session storage failed: {0}")]
    Storage(anyhow::Error),
}

/// The external authentication endpoint: `POST /login` and `POST /logout`
/// in production, a recording fake in tests.
pub trait AuthApi {
    fn login(&self, attempt: &LoginAttempt) -> anyhow::Result<LoginReply>;
    fn logout(&self, token: &str) -> anyhow::Result<()>;
}

/// Persisted key/value pairs, the browser-local-storage analog.
pub trait KvStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str);
}

/// Holder of the role cookie sent along with navigations.
pub trait CookieJar {
    fn set_role_cookie(&mut self, role: Role);
    fn clear_role_cookie(&mut self);
}

/// Where the client currently "is".
pub trait Navigator {
    fn goto(&mut self, route: &str);
}

pub struct SessionStore {
    api: Box<dyn AuthApi>,
    kv: Box<dyn KvStore>,
    cookies: Box<dyn CookieJar>,
    nav: Box<dyn Navigator>,
    current: Option<ClientSession>,
}

impl SessionStore {
    pub fn new(api: Box<dyn AuthApi>, kv: Box<dyn KvStore>, cookies: Box<dyn CookieJar>, nav: Box<dyn Navigator>) -> Self {
        Self { api, kv, cookies, nav, current: None }
    }

    pub fn current(&self) -> Option<&ClientSession> {
        self.current.as_ref()
    }

    /// Recover a persisted session, if any. A corrupt user record clears both
    /// persisted keys and leaves the store logged out; this never fails.
    pub fn initialize(&mut self) {
        let token = self.kv.get(KEY_TOKEN);
        let raw_user = self.kv.get(KEY_USER);
        match (token, raw_user) {
            (Some(token), Some(raw)) => match serde_json::from_str::<Principal>(&raw) {
                Ok(user) => {
                    debug!(target: "client", user = %user.user_id, "session restored");
                    self.current = Some(ClientSession { token, user });
                }
                Err(e) => {
                    warn!(target: "client", "persisted user record unreadable ({}); clearing", e);
                    self.kv.remove(KEY_TOKEN);
                    self.kv.remove(KEY_USER);
                    self.current = None;
                }
            },
            _ => self.current = None,
        }
    }

    /// Authenticate and, on success: persist token and user, mirror the
    /// server-confirmed role into the cookie, then navigate to that role's
    /// landing route. Nothing is mutated on failure.
    pub fn login(&mut self, attempt: &LoginAttempt) -> Result<(), AuthError> {
        let reply = match self.api.login(attempt) {
            Ok(r) => r,
            Err(e) => {
                error!(target: "client", "login call failed: {:#}", e);
                return Err(AuthError::Authentication("Login failed".to_string()));
            }
        };
        let LoginReply { success, token, user, message } = reply;
        let (token, user) = match (success, token, user) {
            (true, Some(token), Some(user)) => (token, user),
            // Rejected outright, or "success" with an incomplete body
            _ => return Err(AuthError::Authentication(message.unwrap_or_else(|| "Login failed".to_string()))),
        };

        self.kv.set(KEY_TOKEN, &token).map_err(AuthError::Storage)?;
        let user_json = serde_json::to_string(&user).map_err(|e| AuthError::Storage(e.into()))?;
        self.kv.set(KEY_USER, &user_json).map_err(AuthError::Storage)?;
        self.cookies.set_role_cookie(user.role);
        let landing = landing_route(user.role);
        self.current = Some(ClientSession { token, user });
        self.nav.goto(landing);
        Ok(())
    }

    /// Tell the server (best-effort), then clear everything locally and go
    /// back to the login route. Always completes.
    pub fn logout(&mut self) {
        if let Some(sess) = self.current.as_ref() {
            if let Err(e) = self.api.logout(&sess.token) {
                warn!(target: "client", "logout call failed: {:#}", e);
            }
        }
        self.current = None;
        self.kv.remove(KEY_TOKEN);
        self.kv.remove(KEY_USER);
        self.cookies.clear_role_cookie();
        self.nav.goto("/login");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Attrs;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct FakeApi {
        log: Log,
        reply: Option<LoginReply>,
        transport_fails: bool,
        logout_fails: bool,
    }

    impl AuthApi for FakeApi {
        fn login(&self, _attempt: &LoginAttempt) -> anyhow::Result<LoginReply> {
            self.log.borrow_mut().push("api.login".into());
            if self.transport_fails {
                return Err(anyhow::anyhow!("connection refused"));
            }
            Ok(self.reply.clone().expect("reply configured"))
        }

        fn logout(&self, _token: &str) -> anyhow::Result<()> {
            self.log.borrow_mut().push("api.logout".into());
            if self.logout_fails {
                return Err(anyhow::anyhow!("gone away"));
            }
            Ok(())
        }
    }

    struct MapKv {
        log: Log,
        map: Rc<RefCell<HashMap<String, String>>>,
    }

    impl KvStore for MapKv {
        fn get(&self, key: &str) -> Option<String> {
            self.map.borrow().get(key).cloned()
        }
        fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
            self.log.borrow_mut().push(format!("kv.set({})", key));
            self.map.borrow_mut().insert(key.to_string(), value.to_string());
            Ok(())
        }
        fn remove(&mut self, key: &str) {
            self.log.borrow_mut().push(format!("kv.remove({})", key));
            self.map.borrow_mut().remove(key);
        }
    }

    struct JarMock {
        log: Log,
        role: Rc<RefCell<Option<Role>>>,
    }

    impl CookieJar for JarMock {
        fn set_role_cookie(&mut self, role: Role) {
            self.log.borrow_mut().push(format!("cookie.set({})", role));
            *self.role.borrow_mut() = Some(role);
        }
        fn clear_role_cookie(&mut self) {
            self.log.borrow_mut().push("cookie.clear".into());
            *self.role.borrow_mut() = None;
        }
    }

    struct NavMock {
        log: Log,
        route: Rc<RefCell<Option<String>>>,
    }

    impl Navigator for NavMock {
        fn goto(&mut self, route: &str) {
            self.log.borrow_mut().push(format!("nav.goto({})", route));
            *self.route.borrow_mut() = Some(route.to_string());
        }
    }

    struct Rig {
        store: SessionStore,
        log: Log,
        kv_map: Rc<RefCell<HashMap<String, String>>>,
        cookie: Rc<RefCell<Option<Role>>>,
        route: Rc<RefCell<Option<String>>>,
    }

    fn rig(reply: Option<LoginReply>, transport_fails: bool, logout_fails: bool) -> Rig {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let kv_map = Rc::new(RefCell::new(HashMap::new()));
        let cookie = Rc::new(RefCell::new(None));
        let route = Rc::new(RefCell::new(None));
        let store = SessionStore::new(
            Box::new(FakeApi { log: log.clone(), reply, transport_fails, logout_fails }),
            Box::new(MapKv { log: log.clone(), map: kv_map.clone() }),
            Box::new(JarMock { log: log.clone(), role: cookie.clone() }),
            Box::new(NavMock { log: log.clone(), route: route.clone() }),
        );
        Rig { store, log, kv_map, cookie, route }
    }

    fn student() -> Principal {
        Principal { user_id: "s1".into(), role: Role::Student, display_name: "Student One".into(), attrs: Attrs::default() }
    }

    fn ok_reply(user: Principal) -> LoginReply {
        LoginReply { success: true, token: Some("tok-1".into()), user: Some(user), message: None }
    }

    fn attempt() -> LoginAttempt {
        LoginAttempt { username: "s1".into(), password: "pw".into(), claimed_role: None }
    }

    #[test]
    fn login_success_runs_effects_in_order() {
        let mut r = rig(Some(ok_reply(student())), false, false);
        r.store.login(&attempt()).unwrap();
        let log = r.log.borrow();
        crate::tprintln!("effect log: {:?}", *log);
        assert_eq!(
            *log,
            vec![
                "api.login".to_string(),
                "kv.set(token)".to_string(),
                "kv.set(user)".to_string(),
                "cookie.set(student)".to_string(),
                "nav.goto(/student/dashboard)".to_string(),
            ]
        );
        assert_eq!(r.store.current().unwrap().token, "tok-1");
        assert!(r.kv_map.borrow().contains_key(KEY_TOKEN));
        assert!(r.kv_map.borrow().contains_key(KEY_USER));
        assert_eq!(*r.cookie.borrow(), Some(Role::Student));
        assert_eq!(r.route.borrow().as_deref(), Some("/student/dashboard"));
    }

    #[test]
    fn server_confirmed_role_wins_over_claimed_role() {
        let mut dean = student();
        dean.role = Role::Dean;
        let mut r = rig(Some(ok_reply(dean)), false, false);
        let mut att = attempt();
        att.claimed_role = Some(Role::Student);
        r.store.login(&att).unwrap();
        assert_eq!(*r.cookie.borrow(), Some(Role::Dean));
        assert_eq!(r.route.borrow().as_deref(), Some("/dean/dashboard"));
    }

    #[test]
    fn rejected_login_carries_server_message_and_mutates_nothing() {
        let reply = LoginReply { success: false, token: None, user: None, message: Some("No such account".into()) };
        let mut r = rig(Some(reply), false, false);
        let err = r.store.login(&attempt()).unwrap_err();
        assert_eq!(err.to_string(), "No such account");
        assert_eq!(*r.log.borrow(), vec!["api.login".to_string()]);
        assert!(r.kv_map.borrow().is_empty());
        assert!(r.cookie.borrow().is_none());
        assert!(r.route.borrow().is_none());
        assert!(r.store.current().is_none());
    }

    #[test]
    fn success_flag_without_token_or_user_is_a_failure() {
        let reply = LoginReply { success: true, token: None, user: Some(student()), message: None };
        let mut r = rig(Some(reply), false, false);
        let err = r.store.login(&attempt()).unwrap_err();
        assert_eq!(err.to_string(), "Login failed");
        assert!(r.kv_map.borrow().is_empty());
    }

    #[test]
    fn transport_failure_surfaces_the_generic_message() {
        let mut r = rig(None, true, false);
        let err = r.store.login(&attempt()).unwrap_err();
        assert_eq!(err.to_string(), "Login failed");
        assert!(r.store.current().is_none());
    }

    #[test]
    fn initialize_restores_a_persisted_session() {
        let mut r = rig(None, false, false);
        let user_json = serde_json::to_string(&student()).unwrap();
        r.kv_map.borrow_mut().insert(KEY_TOKEN.into(), "tok-9".into());
        r.kv_map.borrow_mut().insert(KEY_USER.into(), user_json);
        r.store.initialize();
        assert_eq!(r.store.current().unwrap().token, "tok-9");
        assert_eq!(r.store.current().unwrap().user.role, Role::Student);
    }

    #[test]
    fn initialize_clears_both_keys_on_corrupt_user_record() {
        let mut r = rig(None, false, false);
        r.kv_map.borrow_mut().insert(KEY_TOKEN.into(), "tok-9".into());
        r.kv_map.borrow_mut().insert(KEY_USER.into(), "{not json".into());
        r.store.initialize();
        assert!(r.store.current().is_none());
        assert!(r.kv_map.borrow().is_empty());
    }

    #[test]
    fn initialize_with_only_a_token_stays_logged_out() {
        let mut r = rig(None, false, false);
        r.kv_map.borrow_mut().insert(KEY_TOKEN.into(), "tok-9".into());
        r.store.initialize();
        assert!(r.store.current().is_none());
    }

    #[test]
    fn logout_clears_everything_even_when_the_call_fails() {
        let mut r = rig(Some(ok_reply(student())), false, true);
        r.store.login(&attempt()).unwrap();
        r.log.borrow_mut().clear();

        r.store.logout();
        assert_eq!(
            *r.log.borrow(),
            vec![
                "api.logout".to_string(),
                "kv.remove(token)".to_string(),
                "kv.remove(user)".to_string(),
                "cookie.clear".to_string(),
                "nav.goto(/login)".to_string(),
            ]
        );
        assert!(r.store.current().is_none());
        assert!(r.kv_map.borrow().is_empty());
        assert!(r.cookie.borrow().is_none());
        assert_eq!(r.route.borrow().as_deref(), Some("/login"));
    }

    #[test]
    fn logout_without_a_session_skips_the_collaborator_call() {
        let mut r = rig(None, false, false);
        r.store.logout();
        let log = r.log.borrow();
        assert!(!log.contains(&"api.logout".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("nav.goto(/login)"));
    }
}
