pub mod config;
pub mod db;
pub mod engine;
pub mod imap;
pub mod models;
pub mod secret_codec;
pub mod services;
pub mod smtp;
pub mod telemetry;
pub mod token;
