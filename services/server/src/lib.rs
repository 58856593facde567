pub mod audio;
pub mod config;
pub mod db;
pub mod handlers;
pub mod health;
pub mod models;
pub mod router;
pub mod speech;
pub mod state;
pub mod ws;
