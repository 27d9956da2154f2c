//! The order status transition table.
//!
//! The table binds unprivileged callers only; actors with the
//! force-transition capability may set any status for corrective action.
//! That bypass applies to the generic status update, never to the
//! cancel-specific gate (`Model::can_be_cancelled`).

use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;

/// Statuses an unprivileged actor may move to from `from`.
pub fn allowed_transitions(from: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match from {
        Pending => &[Confirmed, Cancelled],
        Confirmed => &[Preparing, Cancelled],
        Preparing => &[Ready, Cancelled],
        // completed directly from ready covers pickup and dine-in orders
        Ready => &[OutForDelivery, Completed],
        OutForDelivery => &[Delivered, Cancelled],
        Delivered => &[Completed],
        Completed => &[],
        // reactivation of a cancelled order; reachable only through the
        // privileged status route in practice
        Cancelled => &[Pending],
        Refunded => &[],
        // refund states are driven by the payment flows, not by callers
        RefundRequested => &[],
        RefundFailed => &[],
    }
}

pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Validate a requested transition. `can_force` is the actor's capability,
/// injected by the caller; role names never appear here.
pub fn check_transition(
    from: OrderStatus,
    to: OrderStatus,
    can_force: bool,
) -> Result<(), ServiceError> {
    if can_force || is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(ServiceError::conflict(format!(
            "Invalid status transition from {from} to {to}"
        )))
    }
}
