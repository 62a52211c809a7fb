//! Persistence adapters for the core storage ports

mod keyring_storage;
mod memento;

pub use keyring_storage::KeyringSecretStorage;
pub use memento::JsonFileMemento;
