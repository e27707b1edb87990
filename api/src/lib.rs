// Library exports for the proxyshop API, shared with the Telegram bot

#[macro_use]
pub mod models;

pub mod cache;
pub mod commerce;
pub mod config;
pub mod db;
pub mod handlers;
pub mod keyboard;
pub mod middleware;
pub mod notification;
pub mod subscription;
pub mod traffic;
pub mod utils;
