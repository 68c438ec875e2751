//! Password policy and hashing.
//!
//! Policy: 8–255 characters containing at least one lowercase letter, one
//! uppercase letter, one digit, and one symbol. Hashes are Argon2id with
//! the library's recommended parameters.

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::error::{AppError, AppResult};

/// Minimum password length.
pub const MIN_LENGTH: usize = 8;
/// Maximum password length.
pub const MAX_LENGTH: usize = 255;

/// Validate a candidate password against the policy.
pub fn validate_policy(password: &str) -> AppResult<()> {
    let length = password.chars().count();
    if length < MIN_LENGTH || length > MAX_LENGTH {
        return Err(AppError::validation(format!(
            "Password must be between {} and {} characters",
            MIN_LENGTH, MAX_LENGTH
        )));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(AppError::validation("Password must contain a lowercase letter"));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(AppError::validation("Password must contain an uppercase letter"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::validation("Password must contain a digit"));
    }
    if !password.chars().any(|c| !c.is_ascii_alphanumeric()) {
        return Err(AppError::validation("Password must contain a symbol"));
    }
    Ok(())
}

/// Hash a (policy-validated) password.
pub fn hash(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against a stored hash. Malformed hashes verify false.
pub fn verify(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_accepts_conforming() {
        assert!(validate_policy("Aa1!xxxx").is_ok());
        assert!(validate_policy("Sup3r-Secret").is_ok());
    }

    #[test]
    fn test_policy_counter_examples() {
        // One counter-example per rule.
        assert!(validate_policy("Aa1!xxx").is_err()); // too short
        assert!(validate_policy(&format!("Aa1!{}", "x".repeat(252))).is_err()); // too long
        assert!(validate_policy("AA1!XXXX").is_err()); // no lowercase
        assert!(validate_policy("aa1!xxxx").is_err()); // no uppercase
        assert!(validate_policy("Aaa!xxxx").is_err()); // no digit
        assert!(validate_policy("Aa1xxxxx").is_err()); // no symbol
    }

    #[test]
    fn test_hash_and_verify() {
        let hashed = hash("Aa1!xxxx").unwrap();
        assert!(hashed.starts_with("$argon2"));
        assert!(verify("Aa1!xxxx", &hashed));
        assert!(!verify("Aa1!yyyy", &hashed));
        assert!(!verify("Aa1!xxxx", "not-a-hash"));
    }
}
