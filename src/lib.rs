//! Gatekeeper: a Telegram bot that answers mentions through Gemini, fires
//! scheduled reminders, tracks tasks and sends a daily task digest.

pub mod commands;
pub mod config;
pub mod context;
pub mod directory;
pub mod gateway;
pub mod inference;
pub mod mention;
pub mod notify;
pub mod schedule;
pub mod store;
pub mod telegram_log;
