// Telegram bot front end for the proxyshop commerce service

pub mod captions;
pub mod config;
pub mod filters;
pub mod handlers;
pub mod keyboards;
pub mod messages;
pub mod notifier;
pub mod pending;
pub mod routes;
