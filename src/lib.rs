// Infrastructure layer (shared components)
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

// Domain layer (business logic)
pub mod bus;
pub mod connection;
pub mod groups;
pub mod heartbeat;
pub mod notification;
pub mod registry;
pub mod session;
pub mod store;
pub mod topics;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;
