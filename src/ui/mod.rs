//! Control API: status, mute gates, lobby settings and game-state input

pub mod handlers;
pub mod server;
pub mod websocket;

pub use server::WebServer;
