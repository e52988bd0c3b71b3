// ABOUTME: Event processors bridging the platform session and the framework socket
// ABOUTME: incoming = platform-raw -> normalized bot_request, outgoing = bot_response -> platform op

pub mod incoming;
pub mod outgoing;

pub use incoming::IncomingEventProcessor;
pub use outgoing::OutgoingEventProcessor;
