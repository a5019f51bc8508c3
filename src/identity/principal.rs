use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The five account roles. A role decides which path namespace a session may
/// enter and where a successful login lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Dean,
    ActivityHead,
    Club,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Dean => "dean",
            Role::ActivityHead => "activity_head",
            Role::Club => "club",
            Role::Student => "student",
        }
    }

    pub const ALL: [Role; 5] = [Role::Admin, Role::Dean, Role::ActivityHead, Role::Club, Role::Student];
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "dean" => Ok(Role::Dean),
            "activity_head" => Ok(Role::ActivityHead),
            "club" => Ok(Role::Club),
            "student" => Ok(Role::Student),
            other => Err(anyhow::anyhow!("unknown role: {}", other)),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attrs {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// The authenticated identity attached to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub attrs: Attrs,
}
