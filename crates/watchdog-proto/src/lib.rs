pub mod config;
pub mod oauth;
pub mod platform;
pub mod protocol;
pub mod state;
