//! Authentication: Argon2 password hashing over the users table.
//!
//! Login and registration are deliberately fused at the packet level: a
//! failed login falls through to registration when the username is free
//! (see the authorize handler in `core`).

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use uuid::Uuid;

use crate::db::{Database, TRUST_ADMIN, TRUST_PLAYER, UserRecord};

pub struct Auth {
    db: Database,
}

impl Auth {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);
        Ok(Argon2::default().hash_password(password.as_bytes(), &salt)?.to_string())
    }

    pub fn verify_password(password: &str, password_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(password_hash) else {
            return false;
        };
        Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
    }

    /// Check credentials against an existing account.
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        match self.db.get_user(username) {
            Ok(Some(user)) => Self::verify_password(password, &user.password_hash),
            Ok(None) => false,
            Err(e) => {
                tracing::error!(error = %e, "user lookup failed during authentication");
                false
            },
        }
    }

    /// Create a new account. The first user ever registered becomes an
    /// auto-approved admin. Returns false when the username is taken.
    pub fn register(&self, username: &str, password: &str) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }
        match self.db.user_exists(username) {
            Ok(true) => return false,
            Ok(false) => {},
            Err(e) => {
                tracing::error!(error = %e, "user lookup failed during registration");
                return false;
            },
        }
        let first_user = self.db.user_count().unwrap_or(0) == 0;
        let trust_level = if first_user { TRUST_ADMIN } else { TRUST_PLAYER };
        let hash = match Self::hash_password(password) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::error!(error = %e, "password hashing failed");
                return false;
            },
        };
        match self.db.create_user(username, &hash, Uuid::new_v4(), trust_level, first_user) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "user insert failed during registration");
                false
            },
        }
    }

    pub fn get_user(&self, username: &str) -> Option<UserRecord> {
        self.db.get_user(username).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> Auth {
        Auth::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn register_then_authenticate() {
        let auth = auth();
        assert!(auth.register("alice", "secret"));
        assert!(auth.authenticate("alice", "secret"));
        assert!(!auth.authenticate("alice", "wrong"));
        assert!(!auth.authenticate("nobody", "secret"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let auth = auth();
        assert!(auth.register("alice", "secret"));
        assert!(!auth.register("alice", "other"));
    }

    #[test]
    fn empty_credentials_rejected() {
        let auth = auth();
        assert!(!auth.register("", "secret"));
        assert!(!auth.register("alice", ""));
    }

    #[test]
    fn first_user_is_admin_and_approved() {
        let auth = auth();
        assert!(auth.register("alice", "secret"));
        assert!(auth.register("bob", "secret"));

        let alice = auth.get_user("alice").unwrap();
        assert_eq!(alice.trust_level, TRUST_ADMIN);
        assert!(alice.approved);

        let bob = auth.get_user("bob").unwrap();
        assert_eq!(bob.trust_level, TRUST_PLAYER);
        assert!(!bob.approved);
    }

    #[test]
    fn hashes_are_salted() {
        let first = Auth::hash_password("secret").unwrap();
        let second = Auth::hash_password("secret").unwrap();
        assert_ne!(first, second);
        assert!(Auth::verify_password("secret", &first));
        assert!(Auth::verify_password("secret", &second));
        assert!(!Auth::verify_password("other", &first));
    }
}
