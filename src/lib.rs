pub mod api;
pub mod ci;
pub mod config;
pub mod error;
pub mod models;
