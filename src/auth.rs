use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn hash_secret(secret: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(secret.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// A malformed stored hash never verifies.
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

/// Lives only in the sidecar process. Nothing here is persisted or settable
/// by the UI except through a verified secret.
#[derive(Debug, Default, Clone)]
pub struct SessionGate {
    device_authorized: bool,
    user: Option<StaffIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffIdentity {
    pub id: String,
    pub username: String,
}

impl SessionGate {
    pub fn device_authorized(&self) -> bool {
        self.device_authorized
    }

    pub fn user(&self) -> Option<&StaffIdentity> {
        self.user.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.device_authorized && self.user.is_some()
    }

    pub fn authorize_device(&mut self) {
        self.device_authorized = true;
    }

    /// Locking the device also ends the staff session.
    pub fn lock_device(&mut self) {
        self.device_authorized = false;
        self.user = None;
    }

    pub fn sign_in(&mut self, identity: StaffIdentity) {
        self.user = Some(identity);
    }

    pub fn sign_out(&mut self) {
        self.user = None;
    }

    pub fn reset(&mut self) {
        *self = SessionGate::default();
    }
}
