pub mod account;
pub mod message;
pub mod session;

pub use account::{Membership, WebhookBinding};
pub use message::{ChatMessage, MessageRole, NewMessage};
pub use session::{ChatSession, NewSession, DEFAULT_TITLE};
