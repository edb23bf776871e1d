//! HTTP transports for the chat backends

pub mod green_api;
pub mod telegram;

pub use green_api::GreenApiChannel;
pub use telegram::TelegramChannel;
