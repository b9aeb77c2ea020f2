//! Token authentication for the HTTP API
//!
//! The task subsystem only ever sees an already-resolved `AuthUser`; this
//! module is the adapter that produces one. Callers present a bearer
//! token; the provider hashes it and compares the digest against the
//! loaded token table in constant time. A superuser may additionally ask
//! to act as another principal through the effective-user headers.

use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use base64::Engine as _;

use shared::config::{TokenEntry, TokensConfig};
use shared::utils::hash_token;
use shared::AuthUser;

/// Distinguished principal granted full privileges, matching the identity
/// the cluster stack runs under.
pub const SUPERUSER: &str = "hacluster";

pub struct AuthProvider {
    tokens: Vec<TokenEntry>,
}

impl AuthProvider {
    pub fn new(config: TokensConfig) -> Self {
        Self {
            tokens: config.tokens,
        }
    }

    /// Resolve a presented token to a principal.
    ///
    /// Every table entry is compared so the timing does not depend on
    /// where (or whether) the token matches.
    pub fn auth_by_token(&self, token: &str) -> Option<AuthUser> {
        let digest = hash_token(token);
        let mut matched: Option<&TokenEntry> = None;

        for entry in &self.tokens {
            let hashes_equal = digest.len() == entry.token_hash.len()
                && bool::from(digest.as_bytes().ct_eq(entry.token_hash.as_bytes()));
            if hashes_equal {
                matched = Some(entry);
            }
        }

        match matched {
            Some(entry) => {
                debug!(username = %entry.username, "Token resolved");
                Some(AuthUser {
                    username: entry.username.clone(),
                    groups: entry.groups.clone(),
                    is_superuser: entry.superuser,
                })
            }
            None => {
                warn!("Presented token matches no table entry");
                None
            }
        }
    }

    /// Apply the effective-user override a superuser may request.
    ///
    /// Non-superusers always act as themselves. The group list arrives
    /// base64-encoded and space-separated; an undecodable list is logged
    /// and treated as empty rather than failing the request.
    pub fn effective_user(
        real_user: AuthUser,
        desired_username: Option<&str>,
        desired_groups_b64: Option<&str>,
    ) -> AuthUser {
        if !real_user.is_superuser {
            return real_user;
        }
        let Some(username) = desired_username.filter(|u| !u.is_empty()) else {
            return real_user;
        };

        let groups = match desired_groups_b64 {
            Some(encoded) => match decode_group_list(encoded) {
                Ok(groups) => groups,
                Err(e) => {
                    warn!(error = %e, "Unable to decode effective user groups");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        debug!(
            real = %real_user.username,
            effective = %username,
            "Superuser acting as another principal"
        );
        AuthUser {
            username: username.to_string(),
            groups,
            is_superuser: username == SUPERUSER,
        }
    }
}

fn decode_group_list(encoded: &str) -> shared::Result<Vec<String>> {
    let bytes = B64_STANDARD
        .decode(encoded)
        .map_err(|e| shared::ControlError::Validation(format!("Invalid base64 sequence: {}", e)))?;
    let decoded = String::from_utf8(bytes)
        .map_err(|e| shared::ControlError::Validation(format!("Invalid UTF-8: {}", e)))?;
    Ok(decoded
        .split(' ')
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect())
}
