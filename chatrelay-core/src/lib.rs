pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod registry;
pub mod session_key;
pub mod sessions;
pub mod store;
pub mod transcript;

pub use config::RelayConfig;
pub use error::StoreError;
pub use registry::{RegistryError, WebhookRegistry, WebhookTarget};
pub use session_key::{tenant_slug, SessionKey, SessionKeyError, PUBLIC_SLUG};
pub use sessions::{SessionError, SessionResolver};
pub use store::{ChatStore, MemoryStore, PgStore};
pub use transcript::Transcript;
