//! bcrypt hashing. The async wrappers move the work onto actix's blocking
//! pool so request workers stay responsive.

use crate::error::AppError;
use actix_web::web;
use bcrypt::{hash, verify};

const BCRYPT_COST: u32 = 12;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    hash(password, BCRYPT_COST)
        .map_err(|e| AppError::InternalServerError(format!("Failed to hash password: {}", e)))
}

/// A malformed stored hash counts as a mismatch rather than an error, so a
/// corrupt row cannot be told apart from a wrong password.
pub fn verify_password(password: &str, hashed_password: &str) -> bool {
    match verify(password, hashed_password) {
        Ok(matches) => matches,
        Err(e) => {
            log::warn!("Password verification failed on a stored hash: {}", e);
            false
        }
    }
}

pub async fn hash_password_async(password: String) -> Result<String, AppError> {
    web::block(move || hash_password(&password)).await?
}

pub async fn verify_password_async(password: String, hashed_password: String) -> Result<bool, AppError> {
    Ok(web::block(move || verify_password(&password, &hashed_password)).await?)
}
