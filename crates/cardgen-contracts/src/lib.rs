pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod kinds;
pub mod request;
