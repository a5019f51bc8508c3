//! Identity, sessions, and route admission for tessera.
//! Keep the public surface thin and split implementation across sub-modules.

mod gate;
mod principal;
mod provider;
mod role_config;
mod session;

pub use gate::{cookie_value, evaluate, gate_layer, GateDecision, ROLE_COOKIE};
pub use principal::{Attrs, Principal, Role};
pub use provider::{AuthProvider, LocalAuthProvider, LoginReply, LoginRequest, LoginResponse};
pub use role_config::{config_for, landing_route, RoleConfig, API_PREFIX, ASSET_PREFIX, PUBLIC_PREFIXES};
pub use session::{opaque_token, Session, SessionManager, SessionToken, SESSION_TTL_SECS};
