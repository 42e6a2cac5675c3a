use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::errors::StoreError;
use super::repository::CredentialRepository;
use super::types::{StoredCredential, User};

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    credentials: HashMap<String, StoredCredential>,
}

/// In-memory repository for tests and single-process embedding.
///
/// One mutex guards both tables, so the conditional counter update and the
/// uniqueness checks are atomic with respect to concurrent ceremonies.
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
    /// When set, the next `insert_credential` fails with a storage error.
    /// Lets tests exercise the registration rollback path.
    #[cfg(test)]
    pub(crate) fail_next_credential_insert: std::sync::atomic::AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for MemoryRepository {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_credentials_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<StoredCredential>, StoreError> {
        let tables = self.tables.lock().await;
        let mut credentials: Vec<StoredCredential> = tables
            .credentials
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        credentials.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(credentials)
    }

    async fn find_credential_by_id(
        &self,
        credential_id: &str,
    ) -> Result<Option<(StoredCredential, User)>, StoreError> {
        let tables = self.tables.lock().await;
        let Some(credential) = tables.credentials.get(credential_id).cloned() else {
            return Ok(None);
        };
        let user = tables
            .users
            .get(&credential.user_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::Storage(format!(
                    "Credential {credential_id} references missing user {}",
                    credential.user_id
                ))
            })?;
        Ok(Some((credential, user)))
    }

    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!(
                "User id already exists: {}",
                user.id
            )));
        }
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict(format!(
                "Username already exists: {}",
                user.username
            )));
        }
        tables.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn insert_credential(&self, credential: StoredCredential) -> Result<(), StoreError> {
        #[cfg(test)]
        if self
            .fail_next_credential_insert
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(StoreError::Storage(
                "Injected credential insert failure".to_string(),
            ));
        }

        let mut tables = self.tables.lock().await;
        if tables.credentials.contains_key(&credential.credential_id) {
            return Err(StoreError::Conflict(format!(
                "Credential id already exists: {}",
                credential.credential_id
            )));
        }
        if !tables.users.contains_key(&credential.user_id) {
            return Err(StoreError::Storage(format!(
                "No such user: {}",
                credential.user_id
            )));
        }
        tables
            .credentials
            .insert(credential.credential_id.clone(), credential);
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.users.remove(user_id);
        tables.credentials.retain(|_, c| c.user_id != user_id);
        Ok(())
    }

    async fn update_credential_counter(
        &self,
        credential_id: &str,
        expected: u32,
        new: u32,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.credentials.get_mut(credential_id) {
            Some(credential) if credential.sign_count == expected => {
                credential.sign_count = new;
                credential.updated_at = chrono::Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::Storage(format!(
                "No such credential: {credential_id}"
            ))),
        }
    }
}
