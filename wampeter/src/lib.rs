pub mod auth;
pub mod client;
pub mod core;
pub mod message;
pub mod rpc;
pub mod transport;
