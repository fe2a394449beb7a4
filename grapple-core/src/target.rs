//! # Target Resolver
//!
//! Maps the developer shorthand address forms to canonical `host:port` targets:
//!
//! * `:` → `localhost:50051`
//! * `:8080` → `localhost:8080`
//! * anything else is returned unchanged.
//!
//! Shorthand targets imply a local server without transport security. This module only
//! reports whether shorthand was used, the [`connection`](crate::connection) layer applies
//! the policy.

/// Address used when the target is the lone `:` shorthand.
pub const DEFAULT_LOCAL_TARGET: &str = "localhost:50051";

const LOCAL_HOST: &str = "localhost";

/// A canonical target address plus whether it was written in shorthand form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub address: String,
    pub shorthand: bool,
}

/// Resolves a user supplied target into its canonical form.
pub fn resolve_target(target: &str) -> ResolvedTarget {
    if target == ":" {
        return ResolvedTarget {
            address: DEFAULT_LOCAL_TARGET.to_string(),
            shorthand: true,
        };
    }

    match target.strip_prefix(':') {
        Some(port) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            ResolvedTarget {
                address: format!("{LOCAL_HOST}:{port}"),
                shorthand: true,
            }
        }
        _ => ResolvedTarget {
            address: target.to_string(),
            shorthand: false,
        },
    }
}
