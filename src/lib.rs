pub mod account;
pub mod api;
pub mod bridge;
pub mod bus;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod friend;
pub mod session;
pub mod socket;
pub mod store;
pub mod user;
