//! # User Repository
//!
//! Accounts acting on the engine and their password hashes. Only what the
//! engine needs: lookup, creation for seeding, and the argon2 check used
//! before a shift may be closed.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use meridian_core::validation::validate_username;
use meridian_core::{User, ValidationError};

#[derive(Debug, Clone)]
pub struct UserRepository {
    db: Database,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        UserRepository { db }
    }

    /// Creates an active user with an argon2 password hash.
    pub async fn create(&self, username: &str, password: &str, role: &str) -> DbResult<User> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(ValidationError::Required {
                field: "password".to_string(),
            }
            .into());
        }

        let username = username.trim().to_string();
        let role = role.trim().to_string();
        let password_hash = hash_password(password)?;
        let now = self.db.clock().now();

        debug!(username = %username, role = %role, "Creating user");

        let id = self
            .db
            .write("create_user", move |conn| {
                let (username, password_hash, role) =
                    (username.clone(), password_hash.clone(), role.clone());
                Box::pin(async move {
                    let id: i64 = sqlx::query_scalar(
                        "INSERT INTO users (username, password_hash, role, is_active, created_at) \
                         VALUES (?, ?, ?, 1, ?) RETURNING id",
                    )
                    .bind(username)
                    .bind(password_hash)
                    .bind(role)
                    .bind(now)
                    .fetch_one(&mut *conn)
                    .await?;
                    Ok::<_, DbError>(id)
                })
            })
            .await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("User", id))
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash, role, is_active FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(user)
    }

    pub async fn get_by_username(&self, username: &str) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash, role, is_active FROM users WHERE username = ?",
        )
        .bind(username.trim())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(user)
    }

    /// Checks `password` against the stored hash of `user_id`.
    ///
    /// Unknown and inactive users never verify.
    pub async fn verify_password(&self, user_id: i64, password: &str) -> DbResult<bool> {
        let Some(user) = self.get_by_id(user_id).await? else {
            warn!(user_id, "Password check for unknown user");
            return Ok(false);
        };

        if !user.is_active {
            warn!(user_id, "Password check for inactive user");
            return Ok(false);
        }

        Ok(verify_hash(password, &user.password_hash))
    }
}

/// Hash a password for storage.
pub fn hash_password(password: &str) -> DbResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| DbError::Internal(format!("Failed to hash password: {}", e)))?;

    Ok(hash.to_string())
}

/// Verify a password against its stored hash. Malformed hashes never match.
fn verify_hash(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbConfig;

    #[tokio::test]
    async fn test_create_and_verify() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let users = db.users();

        let ana = users.create("ana", "s3cret", "cashier").await.unwrap();
        assert!(ana.is_active);
        assert_ne!(ana.password_hash, "s3cret");

        assert!(users.verify_password(ana.id, "s3cret").await.unwrap());
        assert!(!users.verify_password(ana.id, "wrong").await.unwrap());
        assert!(!users.verify_password(404, "s3cret").await.unwrap());

        let by_name = users.get_by_username("ana").await.unwrap().unwrap();
        assert_eq!(by_name.id, ana.id);
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let users = db.users();

        users.create("ana", "pw", "cashier").await.unwrap();
        let err = users.create("ana", "pw2", "manager").await.unwrap_err();
        assert!(err.is_unique_violation_on("username"));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_hash("pw", "not-a-hash"));
        let hash = hash_password("pw").unwrap();
        assert!(verify_hash("pw", &hash));
    }
}
