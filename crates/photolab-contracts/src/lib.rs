pub mod chat;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod images;
pub mod modes;
pub mod prompt;
pub mod session;
