mod errors;
mod memory;
mod repository;
mod sqlite;
mod types;

pub use errors::StoreError;
pub use memory::MemoryRepository;
pub use repository::CredentialRepository;
pub use sqlite::SqliteRepository;
pub use types::{DeviceType, StoredCredential, User};
