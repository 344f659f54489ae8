//! HTTP surface for the lobby collaborator

pub mod routes;

pub use routes::{build_router, AppError};
