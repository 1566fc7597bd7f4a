//! The `broker` module is a small in-process pub/sub broker for development
//! and tests. It speaks the same frame protocol as production brokers
//! reached through `transport::WebSocketConnector`, supports retained
//! messages and shared subscriptions, and can be served over WebSocket or
//! reached in-process through `transport::LoopbackConnector`.

pub mod client;
pub mod engine;
pub mod message;
pub mod server;
pub mod topic;

pub use engine::Broker;

#[cfg(test)]
mod tests;
