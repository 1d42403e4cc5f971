use anyhow::Result;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use diesel::prelude::*;
use uuid::Uuid;

use crate::users::{NewUser, User, UserModel};
use crate::web::PgPool;

#[derive(Clone)]
pub struct UsersRepository {
    pool: PgPool,
}

impl UsersRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a user by ID
    pub async fn get_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        use crate::schema::users::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let user: Option<UserModel> = dsl::users
                .filter(dsl::id.eq(user_id))
                .first::<UserModel>(&mut conn)
                .optional()?;

            Ok::<Option<UserModel>, anyhow::Error>(user)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Get a user by email (case-insensitive)
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        use crate::schema::users::dsl;

        let pool = self.pool.clone();
        let email = email.to_lowercase();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let user: Option<UserModel> = dsl::users
                .filter(dsl::email.eq(&email))
                .first::<UserModel>(&mut conn)
                .optional()?;

            Ok::<Option<UserModel>, anyhow::Error>(user)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Create a new user with a hashed password
    pub async fn create(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User> {
        use crate::schema::users::dsl;

        let new_user = NewUser {
            email: email.to_lowercase(),
            password_hash: hash_password(password)?,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            is_admin: false,
        };

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let inserted: UserModel = diesel::insert_into(dsl::users)
                .values(&new_user)
                .get_result(&mut conn)?;

            Ok::<UserModel, anyhow::Error>(inserted)
        })
        .await??;

        Ok(result.into())
    }

    /// Verify a user's password, returning the user on success
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>> {
        let user = match self.get_by_email(email).await? {
            Some(user) => user,
            None => return Ok(None),
        };

        if verify_password_hash(&user.password_hash, password)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    /// Grant or revoke admin rights
    pub async fn set_admin(&self, user_id: Uuid, is_admin: bool) -> Result<bool> {
        use crate::schema::users::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated = diesel::update(dsl::users.filter(dsl::id.eq(user_id)))
                .set(dsl::is_admin.eq(is_admin))
                .execute(&mut conn)?;

            Ok::<bool, anyhow::Error>(updated > 0)
        })
        .await??;

        Ok(result)
    }

    /// Count all users
    pub async fn count(&self) -> Result<i64> {
        use crate::schema::users::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let count: i64 = dsl::users.count().get_result(&mut conn)?;

            Ok::<i64, anyhow::Error>(count)
        })
        .await??;

        Ok(result)
    }
}

/// Hash password using Argon2
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    Ok(password_hash.to_string())
}

/// Verify password against hash
fn verify_password_hash(hash: &str, password: &str) -> Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;

    let argon2 = Argon2::default();

    Ok(argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
