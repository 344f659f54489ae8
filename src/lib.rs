//! Arena Server - authoritative simulation and netcode for a top-down arena shooter

pub mod anticheat;
pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod netcode;
pub mod rooms;
pub mod session;
pub mod store;
pub mod util;
pub mod ws;
