use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use rand::rngs::OsRng;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{LoginRequest, User};

/// Password login backing the fallback identity cookie
pub struct AuthService;

impl AuthService {
    /// Verify credentials and return the user
    pub async fn login(db: &Database, req: &LoginRequest) -> Result<User> {
        let user: User = sqlx::query_as("SELECT * FROM users WHERE username = ?")
            .bind(req.username.trim())
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;

        if !Self::verify_password(&req.password, &user.password_hash)? {
            return Err(AppError::Unauthorized("Invalid credentials".to_string()));
        }

        Ok(user)
    }

    /// Create a user; fails if the username is taken
    pub async fn create_user(db: &Database, username: &str, password: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::BadRequest("Username is required".to_string()));
        }
        if password.is_empty() {
            return Err(AppError::BadRequest("Password is required".to_string()));
        }

        let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(db.pool())
            .await?;
        if existing.is_some() {
            return Err(AppError::BadRequest("Username already registered".to_string()));
        }

        let password_hash = Self::hash_password(password)?;
        let user_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&user_id)
        .bind(username)
        .bind(&password_hash)
        .bind(&now)
        .execute(db.pool())
        .await?;

        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&user_id)
            .fetch_one(db.pool())
            .await?;
        Ok(user)
    }

    /// Seed the configured bootstrap account if it does not exist yet
    pub async fn ensure_bootstrap_user(db: &Database, config: &Config) -> Result<()> {
        let (Some(username), Some(password)) = (
            config.bootstrap.username.as_deref(),
            config.bootstrap.password.as_deref(),
        ) else {
            return Ok(());
        };

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username.trim())
            .fetch_one(db.pool())
            .await?;
        if count.0 > 0 {
            return Ok(());
        }

        Self::create_user(db, username, password).await?;
        tracing::info!("Created bootstrap user {}", username.trim());
        Ok(())
    }

    /// Hash password using Argon2
    fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string();

        Ok(password_hash)
    }

    /// Verify password against hash
    fn verify_password(password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}
