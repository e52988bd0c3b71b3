// ABOUTME: Root library module for the skiff adapter binary
// ABOUTME: Lifecycle, event bus, processors, platform clients, and the socket transport

pub mod adapter;
pub mod bus;
pub mod platform;
pub mod processors;
pub mod ws;

pub use adapter::Adapter;
pub use bus::{BusTransport, EventBus, OutgoingDispatcher};
