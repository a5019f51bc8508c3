//! The authoritative role routing table.
//!
//! One entry per role, carrying both the post-login landing route and the
//! path prefixes the role may enter. The login flow and the route gate read
//! the same table, so the two can never drift apart.

use super::principal::Role;

/// Path prefixes that bypass the gate entirely.
pub const PUBLIC_PREFIXES: &[&str] = &["/login", "/register"];

/// Static asset and API prefixes the gate does not police.
pub const ASSET_PREFIX: &str = "/assets";
pub const API_PREFIX: &str = "/api";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleConfig {
    pub landing_route: &'static str,
    pub allowed_prefixes: &'static [&'static str],
}

pub fn config_for(role: Role) -> &'static RoleConfig {
    match role {
        Role::Admin => &RoleConfig { landing_route: "/admin/dashboard", allowed_prefixes: &["/admin"] },
        Role::Dean => &RoleConfig { landing_route: "/dean/dashboard", allowed_prefixes: &["/dean"] },
        Role::ActivityHead => &RoleConfig { landing_route: "/activity-head/dashboard", allowed_prefixes: &["/activity-head"] },
        Role::Club => &RoleConfig { landing_route: "/club/dashboard", allowed_prefixes: &["/club"] },
        Role::Student => &RoleConfig { landing_route: "/student/dashboard", allowed_prefixes: &["/student"] },
    }
}

/// Where a fresh login for `role` is sent.
pub fn landing_route(role: Role) -> &'static str {
    config_for(role).landing_route
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_has_prefixes_and_a_matching_landing_route() {
        for role in Role::ALL {
            let cfg = config_for(role);
            assert!(!cfg.allowed_prefixes.is_empty(), "{} has no prefixes", role);
            let first = cfg.allowed_prefixes[0];
            assert!(
                cfg.landing_route.starts_with(first),
                "{} lands on {} outside its own namespace {}",
                role,
                cfg.landing_route,
                first
            );
        }
    }

    #[test]
    fn prefixes_are_disjoint_across_roles() {
        for a in Role::ALL {
            for b in Role::ALL {
                if a == b {
                    continue;
                }
                for pa in config_for(a).allowed_prefixes {
                    for pb in config_for(b).allowed_prefixes {
                        assert!(
                            !pa.starts_with(pb) && !pb.starts_with(pa),
                            "prefix overlap between {} ({}) and {} ({})",
                            a,
                            pa,
                            b,
                            pb
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn no_role_prefix_shadows_a_public_prefix() {
        for role in Role::ALL {
            for p in config_for(role).allowed_prefixes {
                assert!(!PUBLIC_PREFIXES.contains(p));
            }
        }
    }
}
