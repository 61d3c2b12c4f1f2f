//! Notification pipeline.
//!
//! Events produced by the scheduler and the command listener flow through a
//! single [`NotificationDispatcher`], which applies the per-kind policy
//! (category toggle, every-Nth frequency, cooldown), threads session updates
//! under the session-start message and delivers through a [`MessageSink`].

mod dispatcher;
pub mod events;
mod policy;
mod sink;

pub use dispatcher::{DispatchStats, NotificationDispatcher};
pub use events::{EventKind, ImagePayload, MessageColor, NotificationEvent};
pub use policy::{GateDecision, NotificationPolicy, RateLimitState};
pub use sink::{
    ConversationThread, DeliveryError, ImageDelivery, ImageUpload, MessageSink, OutgoingMessage,
    PostAck, UploadMethod,
};
