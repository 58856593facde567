pub mod assist;
pub mod events;
pub mod models;
pub mod store;
