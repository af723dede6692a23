pub mod actions;
pub mod app;
pub mod compositor;
pub mod config;
pub mod managers;
pub mod roblox_client;
pub mod settings;
pub mod streamdeck;
pub mod text_utils;
pub mod utils;
