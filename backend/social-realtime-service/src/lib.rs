pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod optimistic;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod websocket;
