use std::collections::HashMap;

use sha2::{Digest, Sha256};

pub const COOKIE_NAME: &str = "dispatcher_auth";

const PASS_SUFFIX: &str = "_PASS";
const CAT_PASS_SUFFIX: &str = "_CAT_PASS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    Primary,
    Secondary,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Primary => "primary",
            AccessType::Secondary => "secondary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(AccessType::Primary),
            "secondary" => Some(AccessType::Secondary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPrincipal {
    pub label: String,
    pub access_type: AccessType,
}

/// The label -> secret table, rebuilt from the environment before each auth
/// check so dispatcher accounts can be rotated without a restart.
#[derive(Debug, Clone, Default)]
pub struct AuthTable {
    secrets: HashMap<(String, AccessType), String>,
}

impl AuthTable {
    /// Scan the environment for `<LABEL>_PASS` (primary) and
    /// `<LABEL>_CAT_PASS` (secondary) entries.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut secrets = HashMap::new();
        for (key, value) in vars {
            if value.is_empty() {
                continue;
            }
            if let Some(label) = key.strip_suffix(CAT_PASS_SUFFIX) {
                if !label.is_empty() {
                    secrets.insert(
                        (label.to_lowercase(), AccessType::Secondary),
                        value,
                    );
                }
            } else if let Some(label) = key.strip_suffix(PASS_SUFFIX) {
                if !label.is_empty() {
                    secrets.insert((label.to_lowercase(), AccessType::Primary), value);
                }
            }
        }
        Self { secrets }
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Match a submitted password against every known secret in constant
    /// time. When the same secret exists under both roles, the primary
    /// match wins.
    pub fn login(&self, password: &str) -> Option<(AuthPrincipal, String)> {
        let mut matched: Option<(&str, AccessType, &str)> = None;
        for ((label, access_type), secret) in &self.secrets {
            if constant_time_eq(password.as_bytes(), secret.as_bytes()) {
                let replace = match matched {
                    None => true,
                    Some((_, existing, _)) => {
                        existing == AccessType::Secondary && *access_type == AccessType::Primary
                    }
                };
                if replace {
                    matched = Some((label, *access_type, secret));
                }
            }
        }

        let (label, access_type, secret) = matched?;
        let cookie = mint_cookie(label, access_type, secret);
        Some((
            AuthPrincipal {
                label: label.to_owned(),
                access_type,
            },
            cookie,
        ))
    }

    /// Validate a cookie value. Three-part cookies carry the access type;
    /// two-part cookies are the legacy primary-only form.
    pub fn verify(&self, cookie: &str) -> Option<AuthPrincipal> {
        let parts: Vec<&str> = cookie.split(':').collect();
        match parts.as_slice() {
            [label, access_type, digest] => {
                let access_type = AccessType::parse(access_type)?;
                let secret = self.secrets.get(&(label.to_string(), access_type))?;
                let expected = cookie_digest(label, access_type, secret);
                if constant_time_eq(digest.as_bytes(), expected.as_bytes()) {
                    Some(AuthPrincipal {
                        label: label.to_string(),
                        access_type,
                    })
                } else {
                    None
                }
            }
            [label, digest] => {
                let secret = self
                    .secrets
                    .get(&(label.to_string(), AccessType::Primary))?;
                let expected = legacy_digest(label, secret);
                if constant_time_eq(digest.as_bytes(), expected.as_bytes()) {
                    Some(AuthPrincipal {
                        label: label.to_string(),
                        access_type: AccessType::Primary,
                    })
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// Build the cookie value `label:type:sha256(dispatcher::label:type:secret)`.
pub fn mint_cookie(label: &str, access_type: AccessType, secret: &str) -> String {
    format!(
        "{label}:{}:{}",
        access_type.as_str(),
        cookie_digest(label, access_type, secret)
    )
}

fn cookie_digest(label: &str, access_type: AccessType, secret: &str) -> String {
    sha256_hex(&format!(
        "dispatcher::{label}:{}:{secret}",
        access_type.as_str()
    ))
}

fn legacy_digest(label: &str, secret: &str) -> String {
    sha256_hex(&format!("dispatcher::{label}:{secret}"))
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Byte-wise comparison that does not short-circuit on the first mismatch.
/// Length differences still return early; the secrets compared here are
/// fixed-width digests or operator passwords, where that leak is acceptable.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> AuthTable {
        AuthTable::from_vars([
            ("ALPHA_PASS".to_owned(), "alpha-secret".to_owned()),
            ("BETA_CAT_PASS".to_owned(), "beta-secret".to_owned()),
            ("SHARED_PASS".to_owned(), "twice".to_owned()),
            ("SHARED_CAT_PASS".to_owned(), "twice".to_owned()),
        ])
    }

    #[test]
    fn minted_cookie_verifies_round_trip() {
        let table = table();
        let (principal, cookie) = table.login("alpha-secret").unwrap();
        assert_eq!(principal.label, "alpha");
        assert_eq!(principal.access_type, AccessType::Primary);
        assert_eq!(table.verify(&cookie), Some(principal));
    }

    #[test]
    fn secondary_role_resolves_from_cat_suffix() {
        let table = table();
        let (principal, cookie) = table.login("beta-secret").unwrap();
        assert_eq!(principal.label, "beta");
        assert_eq!(principal.access_type, AccessType::Secondary);
        assert!(table.verify(&cookie).is_some());
    }

    #[test]
    fn primary_wins_when_secret_is_shared() {
        let table = table();
        let (principal, _) = table.login("twice").unwrap();
        assert_eq!(principal.access_type, AccessType::Primary);
    }

    #[test]
    fn tampered_digest_is_rejected() {
        let table = table();
        let (_, cookie) = table.login("alpha-secret").unwrap();

        let mut bytes = cookie.into_bytes();
        let last = bytes.len() - 1;
        bytes[last] = if bytes[last] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert_eq!(table.verify(&tampered), None);
    }

    #[test]
    fn swapped_access_type_is_rejected() {
        let table = table();
        let (_, cookie) = table.login("alpha-secret").unwrap();
        let swapped = cookie.replace(":primary:", ":secondary:");
        assert_eq!(table.verify(&swapped), None);
    }

    #[test]
    fn wrong_password_does_not_login() {
        assert!(table().login("nope").is_none());
    }

    #[test]
    fn malformed_cookies_are_rejected() {
        let table = table();
        assert_eq!(table.verify(""), None);
        assert_eq!(table.verify("alpha"), None);
        assert_eq!(table.verify("alpha:tampered"), None);
        assert_eq!(table.verify("a:b:c:d"), None);
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
