// ABOUTME: Typed models for the framework event socket
// ABOUTME: incoming = adapter->framework bot_request, outgoing = framework->adapter bot_response

pub mod incoming;
pub mod outgoing;
pub mod request;

pub use incoming::{
    AttachmentPayload, BotRequest, IncomingEventBuilder, IncomingEventType, MessagePayload,
    SenderInfo,
};
pub use outgoing::{OutgoingEvent, ResponseData};
pub use request::{RequestEvent, RequestEventBuilder};
