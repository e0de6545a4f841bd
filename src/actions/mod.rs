//! Actions module: dispatching engine actions to a device.

mod handler;

pub use handler::{
    ActionError, ActionHandler, ActionResult, ConfirmationCallback, TakeoverCallback,
};
