// lib.rs
pub mod commands;
pub mod config;
pub mod controllers;
pub mod devices;
pub mod docs;
pub mod error;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod methods;
pub mod models;
pub mod protocols;
pub mod storage;
mod utils;
