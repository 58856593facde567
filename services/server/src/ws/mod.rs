pub mod entity;
pub mod media;
pub mod message;
pub mod protocol;
pub mod session;

pub use session::ws_handler;
