//! Typed event fan-out
//!
//! Producers call [`EventRouter::publish`] and move on; subscribers register
//! per event type. See [`types`] for the payloads the core publishes.

pub mod router;
pub mod types;

pub use router::{EventHandler, EventRouter, EventStream, RouterStats, SubscriptionId};
pub use types::{
    ApprovalRequested, ApprovalResolved, ErrorEvent, MemoryEvent, StatusChanged, TextDelta,
    ToolEvent, TurnEvent,
};
