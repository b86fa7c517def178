mod builtin;
mod error;
mod message_router;
mod message_type;

pub use builtin::{
    AddObjectMessage, ChangeOwnerMessage, ConnectionApprovedMessage, ConnectionRequestMessage,
    DestroyObjectMessage, ObjectSuccessMessage, RpcMessage, TimeSyncMessage,
};
pub use error::RouterError;
pub use message_router::{CustomHandler, MessageRouter, RouteDecision};
pub use message_type::MessageType;
