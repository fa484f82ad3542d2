//! Order placement, status changes and cancellation.

mod coordinator;
mod draft;

pub use coordinator::OrderCoordinator;
pub use draft::{DraftLine, OrderDraft};
