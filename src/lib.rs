//! Library crate for mini-port-scan: batched TCP connect scanning of one host.
pub mod error;
pub mod ports;
pub mod probe;
pub mod scanner;
pub mod server;
pub mod types;
