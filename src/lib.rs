pub mod auth;
pub mod configuration;
pub mod email_client;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod startup;
pub mod telemetry;
pub mod tokens;
pub mod users;
pub mod validators;
