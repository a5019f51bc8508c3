//! Per-request route gate.
//!
//! A coarse admission check that runs before any handler: it looks only at
//! the requested path and the role mirrored into the `user` cookie, and
//! either lets the request through or redirects it into the role's own
//! namespace. The gate never demands a login by itself; a request without a
//! role cookie passes through and the handler's own token check is expected
//! to reject it. Real authorization therefore stays server-side; the cookie
//! is client-writable and only ever steers navigation.

use axum::extract::Request;
use axum::http::header::COOKIE;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use tracing::debug;

use super::principal::Role;
use super::role_config::{config_for, API_PREFIX, ASSET_PREFIX, PUBLIC_PREFIXES};

/// Name of the cookie mirroring the session role.
pub const ROLE_COOKIE: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Redirect(String),
}

/// Pull a single cookie's raw value out of a `Cookie` header value.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    for part in header.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name {
                return Some(&v[1..]);
            }
        }
    }
    None
}

/// Best-effort role extraction from the cookie blob. The value is a
/// percent-encoded JSON object `{"role": "..."}`; any failure along the way
/// means "no role known".
fn role_from_cookie(raw: &str) -> Option<Role> {
    let decoded = match urlencoding::decode(raw) {
        Ok(c) => c.into_owned(),
        Err(_) => raw.to_string(),
    };
    let v: serde_json::Value = serde_json::from_str(&decoded).ok()?;
    v.get("role")?.as_str()?.parse().ok()
}

/// Evaluate the gate for one request. Pure: the decision is a function of the
/// path and the raw `Cookie` header alone.
pub fn evaluate(path: &str, cookie_header: Option<&str>) -> GateDecision {
    // 1. Public pages are always reachable.
    if PUBLIC_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return GateDecision::Allow;
    }
    // 2. The root delegates routing to whatever serves it.
    if path == "/" {
        return GateDecision::Allow;
    }
    // 3. Assets, the API namespace, and anything with a file extension are
    //    outside the gate's jurisdiction.
    if path.starts_with(ASSET_PREFIX) || path.starts_with(API_PREFIX) || path.contains('.') {
        return GateDecision::Allow;
    }
    // 4. Single best-effort parse of the role cookie.
    let role = cookie_header
        .and_then(|h| cookie_value(h, ROLE_COOKIE))
        .and_then(role_from_cookie);
    match role {
        Some(role) => {
            // 5. Known role outside its namespace gets sent home.
            let cfg = config_for(role);
            if cfg.allowed_prefixes.iter().any(|p| path.starts_with(p)) {
                GateDecision::Allow
            } else {
                match cfg.allowed_prefixes.first() {
                    Some(first) => GateDecision::Redirect(format!("{}/dashboard", first)),
                    None => GateDecision::Redirect("/login".to_string()),
                }
            }
        }
        // 6. No role known: pass through, handler-level auth decides.
        None => GateDecision::Allow,
    }
}

/// Axum middleware wrapper: `Redirect` decisions become 307 responses.
pub async fn gate_layer(req: Request, next: Next) -> Response {
    let cookie_header = req.headers().get(COOKIE).and_then(|v| v.to_str().ok());
    match evaluate(req.uri().path(), cookie_header) {
        GateDecision::Allow => next.run(req).await,
        GateDecision::Redirect(to) => {
            debug!(target: "gate", path = %req.uri().path(), to = %to, "redirecting out of namespace");
            Redirect::temporary(&to).into_response()
        }
    }
}
