pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod tickets;
pub mod uploads;
pub mod workers;

pub use workers::{default_handlers, Worker};
