pub mod auth;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod http;
pub mod upstream;
