//! Activity registry: the catalog of student activities, per-student
//! registrations, and check-in state. Each registration carries an opaque
//! check-in token; that token is the payload a printed or on-screen QR code
//! encodes, and redeeming it marks attendance.

mod store;

use serde::{Deserialize, Serialize};

use crate::identity::Role;

pub use store::RegistryStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Activity {
    pub id: String,
    pub title: String,
    pub description: String,
    pub organizer: String,
    pub organizer_role: Role,
    pub capacity: i64,
    pub starts_at_ms: i64,
    pub location: String,
}

/// Caller-supplied fields for a new activity; id and organizer come from the
/// authenticated session.
#[derive(Debug, Clone, Deserialize)]
pub struct NewActivity {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub capacity: i64,
    pub starts_at_ms: i64,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registration {
    pub activity_id: String,
    pub username: String,
    pub checkin_token: String,
    pub registered_at_ms: i64,
    /// 0 until the token is redeemed.
    pub checked_in_at_ms: i64,
}

impl Registration {
    pub fn is_checked_in(&self) -> bool {
        self.checked_in_at_ms != 0
    }
}

/// One row of the dean's attendance report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActivityAttendance {
    pub activity_id: String,
    pub title: String,
    pub registered: usize,
    pub checked_in: usize,
}
