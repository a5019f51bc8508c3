//! Client-side session handling: the persisted token/user pair, the role
//! cookie mirror, and the collaborators the CLI wires them to.

mod connectivity;
mod session_store;

pub use connectivity::{FileKvStore, HeaderCookieJar, HttpAuthApi, RecordingNavigator};
pub use session_store::{AuthApi, AuthError, ClientSession, CookieJar, KvStore, LoginAttempt, Navigator, SessionStore, KEY_TOKEN, KEY_USER};
