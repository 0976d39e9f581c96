//! Per-tenant credential generation
//!
//! Secrets are drawn from the operating system's random source and restricted
//! to ASCII alphanumerics so they can sit unquoted in env files and
//! connection URLs.

use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use std::collections::HashSet;

use crate::error::TenantError;
use crate::types::{SecretKind, TenantSecrets};

/// Shortest secret the generator will produce
pub const MIN_SECRET_LENGTH: usize = 8;

/// Default secret length
pub const DEFAULT_SECRET_LENGTH: usize = 24;

/// Length of the application session secret
pub const SESSION_SECRET_LENGTH: usize = 32;

/// Attempts made to draw a value not already in use
const MAX_DRAWS: usize = 8;

/// Generate one alphanumeric secret of `length` characters
pub fn generate_secret(length: usize) -> Result<String, TenantError> {
    if length < MIN_SECRET_LENGTH {
        return Err(TenantError::SecretGenerationFailure(format!(
            "requested length {} is below the minimum of {}",
            length, MIN_SECRET_LENGTH
        )));
    }
    Ok(Alphanumeric.sample_string(&mut OsRng, length))
}

/// Generate a secret that does not collide with any value in `in_use`
pub fn generate_unique_secret(
    length: usize,
    in_use: &HashSet<String>,
) -> Result<String, TenantError> {
    for _ in 0..MAX_DRAWS {
        let candidate = generate_secret(length)?;
        if !in_use.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(TenantError::SecretGenerationFailure(format!(
        "could not draw an unused secret in {} attempts",
        MAX_DRAWS
    )))
}

/// Generate a complete, pairwise-distinct secret set for a new tenant
///
/// `in_use` holds every secret of every registered tenant; none of them is
/// ever handed out again.
pub fn generate_tenant_secrets(
    length: usize,
    in_use: &HashSet<String>,
) -> Result<TenantSecrets, TenantError> {
    let mut taken = in_use.clone();

    let db_password = generate_unique_secret(length, &taken)?;
    taken.insert(db_password.clone());
    let cache_password = generate_unique_secret(length, &taken)?;
    taken.insert(cache_password.clone());
    let session_secret = generate_unique_secret(length.max(SESSION_SECRET_LENGTH), &taken)?;

    Ok(TenantSecrets {
        db_password,
        cache_password,
        session_secret,
    })
}

/// Return a copy of `secrets` with one value replaced by a fresh secret
pub fn rotate_secrets(
    secrets: &TenantSecrets,
    kind: SecretKind,
    length: usize,
    in_use: &HashSet<String>,
) -> Result<TenantSecrets, TenantError> {
    let mut taken = in_use.clone();
    taken.extend(secrets.values().iter().map(|s| s.to_string()));

    let mut rotated = secrets.clone();
    match kind {
        SecretKind::Database => rotated.db_password = generate_unique_secret(length, &taken)?,
        SecretKind::Cache => rotated.cache_password = generate_unique_secret(length, &taken)?,
        SecretKind::Session => {
            rotated.session_secret =
                generate_unique_secret(length.max(SESSION_SECRET_LENGTH), &taken)?
        }
    }
    Ok(rotated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_alphanumeric_with_requested_length() {
        let secret = generate_secret(16).unwrap();
        assert_eq!(secret.len(), 16);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_short_secret_is_rejected() {
        assert!(matches!(
            generate_secret(0),
            Err(TenantError::SecretGenerationFailure(_))
        ));
        assert!(generate_secret(MIN_SECRET_LENGTH - 1).is_err());
    }

    #[test]
    fn test_consecutive_secrets_differ() {
        let a = generate_secret(DEFAULT_SECRET_LENGTH).unwrap();
        let b = generate_secret(DEFAULT_SECRET_LENGTH).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tenant_secrets_are_pairwise_distinct() {
        let secrets = generate_tenant_secrets(16, &HashSet::new()).unwrap();
        assert_ne!(secrets.db_password, secrets.cache_password);
        assert_ne!(secrets.db_password, secrets.session_secret);
        assert_eq!(secrets.session_secret.len(), SESSION_SECRET_LENGTH);
    }

    #[test]
    fn test_rotation_replaces_only_the_requested_secret() {
        let secrets = generate_tenant_secrets(16, &HashSet::new()).unwrap();
        let rotated = rotate_secrets(&secrets, SecretKind::Cache, 16, &HashSet::new()).unwrap();
        assert_eq!(rotated.db_password, secrets.db_password);
        assert_eq!(rotated.session_secret, secrets.session_secret);
        assert_ne!(rotated.cache_password, secrets.cache_password);
    }
}
