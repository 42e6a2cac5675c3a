use async_trait::async_trait;

use super::errors::StoreError;
use super::types::{StoredCredential, User};

/// Durable store of users and their registered credentials.
///
/// Lookups by unique key return at most one row; absence is a normal
/// outcome (`Ok(None)`), not an error. `update_credential_counter` must be
/// a conditional compare-and-set: two racing authentications that both read
/// the same stored counter must not both succeed in writing.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn list_credentials_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<StoredCredential>, StoreError>;

    /// Look up a credential by its id, together with the owning user.
    async fn find_credential_by_id(
        &self,
        credential_id: &str,
    ) -> Result<Option<(StoredCredential, User)>, StoreError>;

    /// Insert a new user. Duplicate username is `StoreError::Conflict`.
    async fn insert_user(&self, user: User) -> Result<(), StoreError>;

    /// Insert a new credential. Duplicate credential id is
    /// `StoreError::Conflict`.
    async fn insert_credential(&self, credential: StoredCredential) -> Result<(), StoreError>;

    /// Delete a user row. Used as the compensating action when credential
    /// insertion fails after user insertion.
    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError>;

    /// Set the credential's counter to `new` only if it still equals
    /// `expected`. Returns `false` when the conditional write did not
    /// apply (counter moved underneath us).
    async fn update_credential_counter(
        &self,
        credential_id: &str,
        expected: u32,
        new: u32,
    ) -> Result<bool, StoreError>;
}
