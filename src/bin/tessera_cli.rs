//! Minimal CLI client: log in, land on the role's dashboard, log out.
//!
//! Usage: tessera_cli <username> <password> [claimed-role]
//! Env:   TESSERA_URL (default http://127.0.0.1:7878)
//!        TESSERA_PROFILE_DIR (default .tessera)

use anyhow::{anyhow, Context, Result};

use tessera::client::{FileKvStore, HeaderCookieJar, HttpAuthApi, LoginAttempt, RecordingNavigator, SessionStore};
use tessera::identity::Role;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("warn"))
                .unwrap(),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let username = args.next().ok_or_else(|| anyhow!("usage: tessera_cli <username> <password> [claimed-role]"))?;
    let password = args.next().ok_or_else(|| anyhow!("usage: tessera_cli <username> <password> [claimed-role]"))?;
    let claimed_role: Option<Role> = match args.next() {
        Some(raw) => Some(raw.parse().context("unknown claimed role")?),
        None => None,
    };

    let base = std::env::var("TESSERA_URL").unwrap_or_else(|_| "http://127.0.0.1:7878".to_string());
    let profile_dir = std::env::var("TESSERA_PROFILE_DIR").unwrap_or_else(|_| ".tessera".to_string());

    let jar = HeaderCookieJar::default();
    let nav = RecordingNavigator::default();
    let mut store = SessionStore::new(
        Box::new(HttpAuthApi::new(&base)?),
        Box::new(FileKvStore::new(&profile_dir)?),
        Box::new(jar.clone()),
        Box::new(nav.clone()),
    );
    store.initialize();

    store
        .login(&LoginAttempt { username: username.clone(), password, claimed_role })
        .map_err(|e| anyhow!("{}", e))?;

    let session = store.current().expect("logged in");
    let landing = nav.current_route().unwrap_or_default();
    println!("logged in as {} ({})", session.user.user_id, session.user.role);
    println!("landing route: {}", landing);

    // Fetch the landing dashboard the way a navigation would: role cookie on
    // the request, bearer token for the handler's own check.
    let client = reqwest::blocking::Client::new();
    let mut req = client.get(format!("{}{}", base.trim_end_matches('/'), landing)).bearer_auth(&session.token);
    if let Some(cookie) = jar.cookie_header() {
        req = req.header("Cookie", cookie);
    }
    let resp = req.send().context("dashboard request failed")?;
    println!("dashboard [{}]: {}", resp.status(), resp.text().unwrap_or_default());

    store.logout();
    println!("logged out, back at {}", nav.current_route().unwrap_or_default());
    Ok(())
}
