use crate::error::ServiceError;
use crate::store::Store;
use crate::user::User;
use hex::encode;
use md5::{Digest, Md5};
use rand::Rng;
use tracing::info;

const PIN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const PIN_LENGTH: usize = 6;

/// Registration, login and OAuth find-or-create. PIN generation lives here
/// because a PIN is assigned exactly once, at account creation.
#[derive(Clone)]
pub struct AccountService {
    store: Store,
    secret_key: String,
}

impl AccountService {
    pub fn new(store: Store, secret_key: String) -> Self {
        Self { store, secret_key }
    }

    /// Create a credentials account. The email must be unused; the PIN is
    /// generated and immutable afterwards.
    pub async fn register(
        &self,
        fullname: &str,
        email: &str,
        password: &str,
    ) -> Result<User, ServiceError> {
        if self.store.user_by_email(email).await?.is_some() {
            return Err(ServiceError::AlreadyExists("user already exists"));
        }

        let pin = self.generate_unique_pin().await?;
        let digest = digest_password(&self.secret_key, password);
        let user = User::new(fullname, email, Some(digest), pin, "credentials");
        self.store.create_user(&user).await?;

        info!("Registered user {} with PIN {}", user.id, user.pin);
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ServiceError> {
        let user = self
            .store
            .user_by_email(email)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        match &user.password_digest {
            Some(digest) if *digest == digest_password(&self.secret_key, password) => Ok(user),
            // OAuth accounts have no digest and cannot log in with a password
            _ => Err(ServiceError::InvalidCredentials),
        }
    }

    /// Find-or-create for an OAuth sign-in whose identity the provider has
    /// already verified. Existing users keep their PIN.
    pub async fn oauth_login(&self, email: &str, fullname: &str) -> Result<User, ServiceError> {
        if let Some(user) = self.store.user_by_email(email).await? {
            return Ok(user);
        }

        let pin = self.generate_unique_pin().await?;
        let user = User::new(fullname, email, None, pin, "google");
        self.store.create_user(&user).await?;

        info!("Created OAuth user {} with PIN {}", user.id, user.pin);
        Ok(user)
    }

    /// Random 6-character alphanumeric PIN, re-rolled until no existing user
    /// holds it. The unique index on users.pin is the backstop.
    pub async fn generate_unique_pin(&self) -> Result<String, ServiceError> {
        loop {
            let pin: String = {
                let mut rng = rand::thread_rng();
                (0..PIN_LENGTH)
                    .map(|_| PIN_CHARSET[rng.gen_range(0..PIN_CHARSET.len())] as char)
                    .collect()
            };

            if !self.store.pin_exists(&pin).await? {
                return Ok(pin);
            }
        }
    }
}

fn digest_password(key: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(key.as_bytes());
    hasher.update(password.as_bytes());
    encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> AccountService {
        let store = Store::in_memory().await.unwrap();
        AccountService::new(store, "test-secret".to_string())
    }

    #[tokio::test]
    async fn register_assigns_six_char_pin() {
        let accounts = service().await;
        let user = accounts
            .register("Ada Lovelace", "ada@example.com", "hunter2")
            .await
            .unwrap();

        assert_eq!(user.pin.len(), 6);
        assert!(user
            .pin
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_eq!(user.role, "member");
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let accounts = service().await;
        accounts
            .register("Ada", "ada@example.com", "hunter2")
            .await
            .unwrap();

        let err = accounts
            .register("Other Ada", "ada@example.com", "hunter3")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn login_verifies_digest() {
        let accounts = service().await;
        accounts
            .register("Ada", "ada@example.com", "hunter2")
            .await
            .unwrap();

        let user = accounts.login("ada@example.com", "hunter2").await.unwrap();
        assert_eq!(user.email, "ada@example.com");

        let err = accounts
            .login("ada@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }

    #[tokio::test]
    async fn oauth_login_is_find_or_create() {
        let accounts = service().await;
        let created = accounts.oauth_login("ada@example.com", "Ada").await.unwrap();
        assert!(created.password_digest.is_none());
        assert_eq!(created.provider, "google");

        let found = accounts.oauth_login("ada@example.com", "Ada L").await.unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.pin, created.pin);

        let err = accounts
            .login("ada@example.com", "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }
}
