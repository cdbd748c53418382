//! NATS connectivity for the job broker

pub mod client;

pub use client::NatsClient;
