#![doc = "The `quillpost` library crate."]
#![doc = ""]
#![doc = "Domain models, authentication, slug and tag utilities, upload storage, routing"]
#![doc = "configuration and error handling for the Quillpost blogging API. The binary"]
#![doc = "(`main.rs`) wires these into an actix-web server."]

pub mod auth;
pub mod config;
pub mod error;
pub mod mailer;
pub mod models;
pub mod routes;
pub mod slug;
pub mod uploads;

pub use crate::config::Config;
pub use crate::error::AppError;
