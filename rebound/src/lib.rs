//! Configuration loading and process wiring for the rebound redelivery engine

pub mod controller;

pub use controller::{
    EndpointConfig, EndpointKind, Engine, Rebound, Resolution, SHUTDOWN_BROADCAST, Simulation,
};
