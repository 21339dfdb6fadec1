//! Connection profiles, their stores, and secret handling

pub mod credentials;
pub mod manager;
pub mod profile;
pub mod store;

pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use manager::ConnectionManager;
pub use profile::{ConnectionProfile, SqliteProfile, TrinoProfile};
pub use store::{EnvProfileStore, FileProfileStore, ProfileStore};
