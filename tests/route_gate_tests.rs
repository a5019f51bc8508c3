//! Route gate integration tests: the cookie-mirrored role only ever steers
//! navigation, and handler-level token auth stays the real boundary.

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tempfile::tempdir;
use tower::ServiceExt;

use tessera::identity::{LoginReply, Role};
use tessera::security;
use tessera::server::AppState;

fn role_cookie(role: &str) -> String {
    format!("user={}", urlencoding::encode(&format!("{{\"role\":\"{}\"}}", role)))
}

fn test_app(root: &str) -> Result<Router> {
    security::add_user(root, "admin", "adminpw", Role::Admin, "Administrator")?;
    security::add_user(root, "s1", "studentpw", Role::Student, "Student One")?;
    security::add_user(root, "d1", "deanpw", Role::Dean, "Dean One")?;
    Ok(tessera::server::app(AppState::new(root)?))
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// POST /login and return (bearer token, role cookie pair).
async fn login(app: &Router, username: &str, password: &str) -> (String, String) {
    let req = Request::builder()
        .method("POST")
        .uri("/login")
        .header("content-type", "application/json")
        .body(Body::from(format!(r#"{{"username":"{}","password":"{}"}}"#, username, password)))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(';').next())
        .unwrap()
        .to_string();
    let reply: LoginReply = serde_json::from_slice(
        &axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap(),
    )
    .unwrap();
    assert!(reply.success);
    (reply.token.unwrap(), cookie)
}

#[tokio::test]
async fn wrong_namespace_cookie_is_redirected_home() -> Result<()> {
    let tmp = tempdir()?;
    let app = test_app(&tmp.path().to_string_lossy())?;

    let req = Request::builder()
        .uri("/admin/dashboard")
        .header("cookie", role_cookie("student"))
        .body(Body::empty())?;
    let resp = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers().get("location").unwrap(), "/student/dashboard");
    Ok(())
}

#[tokio::test]
async fn no_cookie_passes_the_gate_and_the_handler_rejects() -> Result<()> {
    let tmp = tempdir()?;
    let app = test_app(&tmp.path().to_string_lossy())?;

    let req = Request::builder().uri("/student/dashboard").body(Body::empty())?;
    let resp = app.oneshot(req).await?;
    // Not a redirect: the gate let it through, handler auth said no
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let v = body_json(resp).await;
    assert_eq!(v["code"], "missing_token");
    Ok(())
}

#[tokio::test]
async fn own_namespace_with_a_real_session_is_served() -> Result<()> {
    let tmp = tempdir()?;
    let app = test_app(&tmp.path().to_string_lossy())?;

    let (token, cookie) = login(&app, "d1", "deanpw").await;
    let req = Request::builder()
        .uri("/dean/reports")
        .header("cookie", cookie)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())?;
    let resp = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    assert_eq!(v["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn a_forged_cookie_alone_grants_nothing() -> Result<()> {
    let tmp = tempdir()?;
    let app = test_app(&tmp.path().to_string_lossy())?;

    // Gate-wise this request is in the right namespace, but there is no session
    let req = Request::builder()
        .uri("/admin/dashboard")
        .header("cookie", role_cookie("admin"))
        .body(Body::empty())?;
    let resp = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn malformed_cookie_is_treated_as_no_role() -> Result<()> {
    let tmp = tempdir()?;
    let app = test_app(&tmp.path().to_string_lossy())?;

    let req = Request::builder()
        .uri("/student/dashboard")
        .header("cookie", "user=!!not-json!!")
        .body(Body::empty())?;
    let resp = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn public_and_exempt_paths_never_redirect() -> Result<()> {
    let tmp = tempdir()?;
    let app = test_app(&tmp.path().to_string_lossy())?;

    // Login is public even with a wrong-namespace cookie on the request
    let req = Request::builder()
        .method("POST")
        .uri("/login")
        .header("cookie", role_cookie("student"))
        .header("content-type", "application/json")
        .body(Body::from(r#"{"username":"s1","password":"bad"}"#))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().get("location").is_none());

    // Root answers directly
    let resp = app.clone().oneshot(Request::builder().uri("/").body(Body::empty())?).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // Dotted paths fall through the gate to plain 404
    let req = Request::builder()
        .uri("/favicon.ico")
        .header("cookie", role_cookie("student"))
        .body(Body::empty())?;
    let resp = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn failed_login_reports_success_false_with_a_message() -> Result<()> {
    let tmp = tempdir()?;
    let app = test_app(&tmp.path().to_string_lossy())?;

    let req = Request::builder()
        .method("POST")
        .uri("/login")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"username":"s1","password":"nope"}"#))?;
    let resp = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().get("set-cookie").is_none(), "no cookie on failure");
    let reply: LoginReply =
        serde_json::from_slice(&axum::body::to_bytes(resp.into_body(), usize::MAX).await?)?;
    assert!(!reply.success);
    assert!(reply.token.is_none());
    assert!(reply.message.is_some());
    Ok(())
}

#[tokio::test]
async fn logout_clears_the_role_cookie() -> Result<()> {
    let tmp = tempdir()?;
    let app = test_app(&tmp.path().to_string_lossy())?;

    let (token, _cookie) = login(&app, "s1", "studentpw").await;
    let req = Request::builder()
        .method("POST")
        .uri("/logout")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let set_cookie = resp.headers().get("set-cookie").unwrap().to_str()?;
    assert!(set_cookie.contains("Max-Age=0"));

    // The revoked token no longer authenticates
    let req = Request::builder()
        .uri("/student/dashboard")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())?;
    let resp = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}
