//! Media relay: rule-based video forwarding and history migration for
//! Telegram chats.

pub mod bot;
pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod media;
pub mod relay;
pub mod rules;
pub mod store;
pub mod transport;
