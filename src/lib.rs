pub mod auth;
pub mod authorizer;
pub mod chat;
pub mod config;
pub mod error;
pub mod frame;
pub mod models;
pub mod request;
pub mod session;
pub mod template;
