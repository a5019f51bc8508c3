//!
//! tessera HTTP server
//! -------------------
//! Axum-based HTTP API for the activity registry.
//!
//! Responsibilities:
//! - Login/logout endpoints backed by the local user store, returning the
//!   bearer token and mirroring the confirmed role into the `user` cookie.
//! - Public account registration for the self-service roles.
//! - The route gate layer: wrong-role navigation is redirected into the
//!   role's own namespace before any handler runs.
//! - Role namespaces (/admin, /dean, /activity-head, /club, /student), each
//!   re-authenticating the bearer token on every call. The cookie only ever
//!   steers navigation; it grants nothing here.
//! - Activity creation, student registration, and check-in token redemption.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::error::AppError;
use crate::identity::{
    gate_layer, AuthProvider, LocalAuthProvider, LoginReply, LoginRequest, Principal, Role, SessionManager,
    ROLE_COOKIE, SESSION_TTL_SECS,
};
use crate::registry::{NewActivity, RegistryStore};
use crate::security;

/// Max-Age for the role cookie; kept equal to the session TTL so the cookie
/// and the session expire together.
const ROLE_COOKIE_MAX_AGE: u64 = SESSION_TTL_SECS;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db_root: String,
    pub sessions: Arc<SessionManager>,
    pub auth: Arc<LocalAuthProvider>,
    pub registry: Arc<RegistryStore>,
}

impl AppState {
    pub fn new(db_root: &str) -> anyhow::Result<Self> {
        let sessions = Arc::new(SessionManager::default());
        let auth = Arc::new(LocalAuthProvider::new(db_root.to_string(), sessions.clone()));
        let registry = Arc::new(RegistryStore::new(db_root)?);
        Ok(Self { db_root: db_root.to_string(), sessions, auth, registry })
    }
}

fn log_startup(db_root: &str) {
    let cwd = std::env::current_dir().ok();
    info!(target: "startup", "tessera starting. db_root={:?}, cwd={:?}", db_root, cwd);
    match security::list_users(db_root) {
        Ok(users) => info!(target: "startup", "user store: {} account(s)", users.len()),
        Err(e) => error!(target: "startup", "user store unreadable: {e:#}"),
    }
}

/// Start the tessera HTTP server bound to the given port.
pub async fn run_with_port(http_port: u16, db_root: &str) -> anyhow::Result<()> {
    log_startup(db_root);
    std::fs::create_dir_all(db_root)
        .with_context(|| format!("Failed to create or access database root: {}", db_root))?;
    security::ensure_default_admin(db_root)
        .with_context(|| format!("While ensuring default admin under db_root: {}", db_root))?;

    let state = AppState::new(db_root)?;
    let app = app(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Convenience entry point using the default port (7878) and db root "dbs".
pub async fn run() -> anyhow::Result<()> {
    run_with_port(7878, "dbs").await
}

/// Build the full router, gate layer included. Exposed so tests can drive
/// the app in-process.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "tessera ok" }))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/register", post(register))
        .route("/admin/dashboard", get(admin_dashboard))
        .route("/admin/users", post(admin_create_user))
        .route("/admin/users/{username}", delete(admin_delete_user))
        .route("/dean/dashboard", get(dean_dashboard))
        .route("/dean/reports", get(dean_reports))
        .route("/activity-head/dashboard", get(organizer_dashboard))
        .route("/activity-head/activities", post(create_activity))
        .route("/activity-head/activities/{id}/attendance", get(activity_attendance))
        .route("/activity-head/checkin", post(check_in))
        .route("/club/dashboard", get(organizer_dashboard))
        .route("/club/activities", post(create_activity))
        .route("/club/checkin", post(check_in))
        .route("/student/dashboard", get(student_dashboard))
        .route("/student/activities", get(student_activities))
        .route("/student/activities/{id}/register", post(student_register))
        .layer(middleware::from_fn(gate_layer))
        .with_state(state)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({"status": "error", "code": self.code_str(), "message": self.message()}))).into_response()
    }
}

fn set_role_cookie(role: Role) -> HeaderValue {
    let blob = json!({ "role": role.as_str() }).to_string();
    HeaderValue::from_str(&format!(
        "{}={}; Max-Age={}; SameSite=Lax; Path=/",
        ROLE_COOKIE,
        urlencoding::encode(&blob),
        ROLE_COOKIE_MAX_AGE
    ))
    .unwrap()
}

fn clear_role_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!("{}=deleted; Max-Age=0; SameSite=Lax; Path=/", ROLE_COOKIE)).unwrap()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get("authorization").or_else(|| headers.get("Authorization"))?;
    let s = auth.to_str().ok()?;
    s.strip_prefix("Bearer ").map(|t| t.trim().to_string())
}

/// Authenticate the bearer token and require the namespace role. Admin
/// passes every namespace check.
fn require_role(state: &AppState, headers: &HeaderMap, namespace: Role) -> Result<Principal, AppError> {
    require_any(state, headers, &[namespace])
}

fn require_any(state: &AppState, headers: &HeaderMap, namespaces: &[Role]) -> Result<Principal, AppError> {
    let token = bearer_token(headers).ok_or_else(|| AppError::auth("missing_token", "missing bearer token"))?;
    let principal = state
        .sessions
        .validate(&token)
        .ok_or_else(|| AppError::auth("invalid_token", "session expired or unknown"))?;
    if principal.role == Role::Admin || namespaces.contains(&principal.role) {
        Ok(principal)
    } else {
        Err(AppError::forbidden("wrong_role", "this namespace belongs to another role"))
    }
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
    #[serde(default)]
    role: Option<Role>,
}

async fn login(State(state): State<AppState>, Json(payload): Json<LoginPayload>) -> impl IntoResponse {
    let req = LoginRequest {
        username: payload.username.clone(),
        password: payload.password,
        claimed_role: payload.role,
        ip: None,
    };
    match state.auth.login(&req) {
        Ok(resp) => {
            let principal = resp.session.principal.clone();
            let mut headers = HeaderMap::new();
            headers.insert("Set-Cookie", set_role_cookie(principal.role));
            let reply = LoginReply {
                success: true,
                token: Some(resp.session.token.clone()),
                user: Some(principal),
                message: None,
            };
            (StatusCode::OK, headers, Json(reply))
        }
        Err(e) => {
            let app = AppError::from(e);
            info!(target: "auth", user = %payload.username, "login rejected: {}", app);
            let reply = LoginReply {
                success: false,
                token: None,
                user: None,
                message: Some(app.message().to_string()),
            };
            let status = StatusCode::from_u16(app.http_status()).unwrap_or(StatusCode::UNAUTHORIZED);
            (status, HeaderMap::new(), Json(reply))
        }
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = bearer_token(&headers) {
        let _ = state.sessions.logout(&token);
    }
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", clear_role_cookie());
    (StatusCode::OK, h, Json(json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    username: String,
    password: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    role: Option<Role>,
}

/// Self-service signup. Staff roles are provisioned by the admin.
async fn register(State(state): State<AppState>, Json(payload): Json<RegisterPayload>) -> Result<impl IntoResponse, AppError> {
    let role = payload.role.unwrap_or(Role::Student);
    if !matches!(role, Role::Student | Role::Club | Role::ActivityHead) {
        return Err(AppError::user("role_not_registrable", "this role is provisioned by the administrator"));
    }
    security::add_user(&state.db_root, &payload.username, &payload.password, role, &payload.display_name)?;
    info!(target: "auth", user = %payload.username, role = %role, "account registered");
    Ok((StatusCode::OK, Json(json!({"status": "ok", "username": payload.username, "role": role.as_str()}))))
}

async fn admin_dashboard(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    let _admin = require_role(&state, &headers, Role::Admin)?;
    let users = security::list_users(&state.db_root)?;
    let mut by_role = serde_json::Map::new();
    for role in Role::ALL {
        let n = users.iter().filter(|u| u.role == role).count();
        by_role.insert(role.as_str().to_string(), json!(n));
    }
    let report = state.registry.attendance_report()?;
    let registered: usize = report.iter().map(|r| r.registered).sum();
    let checked_in: usize = report.iter().map(|r| r.checked_in).sum();
    Ok(Json(json!({
        "status": "ok",
        "users": users.len(),
        "users_by_role": by_role,
        "activities": report.len(),
        "registrations": registered,
        "checked_in": checked_in,
    })))
}

#[derive(Debug, Deserialize)]
struct CreateUserPayload {
    username: String,
    password: String,
    role: Role,
    #[serde(default)]
    display_name: String,
}

async fn admin_create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateUserPayload>,
) -> Result<impl IntoResponse, AppError> {
    let _admin = require_role(&state, &headers, Role::Admin)?;
    security::add_user(&state.db_root, &payload.username, &payload.password, payload.role, &payload.display_name)?;
    Ok(Json(json!({"status": "ok", "username": payload.username, "role": payload.role.as_str()})))
}

async fn admin_delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let admin = require_role(&state, &headers, Role::Admin)?;
    if admin.user_id == username {
        return Err(AppError::user("self_delete", "refusing to delete the calling account"));
    }
    security::delete_user(&state.db_root, &username)?;
    let revoked = state.sessions.revoke_user(&username);
    Ok(Json(json!({"status": "ok", "deleted": username, "sessions_revoked": revoked})))
}

async fn dean_dashboard(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    let dean = require_role(&state, &headers, Role::Dean)?;
    let report = state.registry.attendance_report()?;
    let registered: usize = report.iter().map(|r| r.registered).sum();
    let checked_in: usize = report.iter().map(|r| r.checked_in).sum();
    Ok(Json(json!({
        "status": "ok",
        "display_name": dean.display_name,
        "activities": report.len(),
        "registrations": registered,
        "checked_in": checked_in,
    })))
}

async fn dean_reports(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    let _dean = require_role(&state, &headers, Role::Dean)?;
    let report = state.registry.attendance_report()?;
    Ok(Json(json!({"status": "ok", "report": report})))
}

/// Shared by /activity-head and /club: the organizer's own activities with
/// their registration counts.
async fn organizer_dashboard(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    let who = require_any(&state, &headers, &[Role::ActivityHead, Role::Club])?;
    let mine: Vec<_> = state
        .registry
        .list_activities()?
        .into_iter()
        .filter(|a| a.organizer == who.user_id)
        .collect();
    let mut rows = Vec::with_capacity(mine.len());
    for a in mine {
        let regs = state.registry.registrations_for(&a.id)?;
        rows.push(json!({
            "activity": a,
            "registered": regs.len(),
            "checked_in": regs.iter().filter(|r| r.is_checked_in()).count(),
        }));
    }
    Ok(Json(json!({"status": "ok", "display_name": who.display_name, "activities": rows})))
}

async fn create_activity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewActivity>,
) -> Result<impl IntoResponse, AppError> {
    let who = require_any(&state, &headers, &[Role::ActivityHead, Role::Club])?;
    let activity = state.registry.create_activity(&who.user_id, who.role, &payload)?;
    Ok((StatusCode::OK, Json(json!({"status": "ok", "activity": activity}))))
}

async fn activity_attendance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let who = require_any(&state, &headers, &[Role::ActivityHead, Role::Club])?;
    let Some(activity) = state.registry.get_activity(&id)? else {
        return Err(AppError::not_found("activity_not_found", "no such activity"));
    };
    if activity.organizer != who.user_id && who.role != Role::Admin {
        return Err(AppError::forbidden("not_organizer", "attendance is visible to the organizer only"));
    }
    let regs = state.registry.registrations_for(&id)?;
    Ok(Json(json!({"status": "ok", "activity": activity, "registrations": regs})))
}

#[derive(Debug, Deserialize)]
struct CheckInPayload {
    token: String,
}

/// Redeem a scanned check-in token.
async fn check_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CheckInPayload>,
) -> Result<impl IntoResponse, AppError> {
    let _who = require_any(&state, &headers, &[Role::ActivityHead, Role::Club])?;
    let reg = state.registry.check_in(&payload.token)?;
    Ok(Json(json!({"status": "ok", "registration": reg})))
}

async fn student_dashboard(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    let student = require_role(&state, &headers, Role::Student)?;
    let regs = state.registry.registrations_by(&student.user_id)?;
    let mut rows = Vec::with_capacity(regs.len());
    for reg in regs {
        let title = state
            .registry
            .get_activity(&reg.activity_id)?
            .map(|a| a.title)
            .unwrap_or_default();
        rows.push(json!({"title": title, "registration": reg}));
    }
    Ok(Json(json!({"status": "ok", "display_name": student.display_name, "registrations": rows})))
}

async fn student_activities(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    let _student = require_role(&state, &headers, Role::Student)?;
    let report = state.registry.attendance_report()?;
    let mut rows = Vec::new();
    for activity in state.registry.list_activities()? {
        let registered = report
            .iter()
            .find(|r| r.activity_id == activity.id)
            .map(|r| r.registered)
            .unwrap_or(0);
        let seats_left = (activity.capacity - registered as i64).max(0);
        rows.push(json!({"activity": activity, "seats_left": seats_left}));
    }
    Ok(Json(json!({"status": "ok", "activities": rows})))
}

/// Register the calling student; the reply carries the check-in token the
/// QR code encodes.
async fn student_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let student = require_role(&state, &headers, Role::Student)?;
    let reg = state.registry.register(&id, &student.user_id)?;
    Ok(Json(json!({"status": "ok", "registration": reg})))
}
