pub mod config;
pub mod dispatch;
pub mod enroll;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod redemption;
pub mod store;
pub mod subscriptions;
pub mod tokens;
pub mod twitch;
pub mod webhook;

pub use error::Error;
