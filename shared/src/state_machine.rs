//! Order and pickup transition rules.
//!
//! The order table lists, for each target status, the statuses it may be
//! entered from. Pickups follow their own smaller table; the parent order
//! follows the slowest pickup that has not been rejected.

use std::collections::{HashMap, VecDeque};

use crate::error::{AppError, AppResult};
use crate::status::{OrderStatus, PickupStatus};

pub fn allowed_predecessors(to: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match to {
        Created => &[Pending],
        Confirmed => &[Created],
        Preparing => &[Confirmed, Created],
        Ready => &[Preparing, Confirmed],
        Picked => &[Ready, Preparing],
        Delivered => &[Picked],
        Rejected => &[Created],
        Cancelled => &[Pending, Created, Confirmed, Preparing, Ready],
        Pending => &[],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_predecessors(to).contains(&from)
}

pub fn validate_transition(from: OrderStatus, to: OrderStatus) -> AppResult<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(AppError::unprocessable(format!(
            "invalid status transition from {} to {}",
            from, to
        )))
    }
}

pub fn allowed_pickup_predecessors(to: PickupStatus) -> &'static [PickupStatus] {
    use PickupStatus::*;
    match to {
        Confirmed => &[New],
        Preparing => &[New, Confirmed],
        Ready => &[Confirmed, Preparing],
        Picked => &[Preparing, Ready],
        Rejected => &[New],
        New => &[],
    }
}

pub fn validate_pickup_transition(from: PickupStatus, to: PickupStatus) -> AppResult<()> {
    if allowed_pickup_predecessors(to).contains(&from) {
        Ok(())
    } else {
        Err(AppError::unprocessable(format!(
            "invalid pickup transition from {} to {}",
            from, to
        )))
    }
}

/// Position on the kitchen track, shared by orders and pickups.
fn order_rank(status: OrderStatus) -> Option<u8> {
    match status {
        OrderStatus::Created => Some(0),
        OrderStatus::Confirmed => Some(1),
        OrderStatus::Preparing => Some(2),
        OrderStatus::Ready => Some(3),
        OrderStatus::Picked => Some(4),
        _ => None,
    }
}

fn pickup_rank(status: PickupStatus) -> Option<u8> {
    match status {
        PickupStatus::New => Some(0),
        PickupStatus::Confirmed => Some(1),
        PickupStatus::Preparing => Some(2),
        PickupStatus::Ready => Some(3),
        PickupStatus::Picked => Some(4),
        PickupStatus::Rejected => None,
    }
}

/// Order status a pickup status corresponds to on the kitchen track.
pub fn order_status_for_pickup(status: PickupStatus) -> Option<OrderStatus> {
    match status {
        PickupStatus::New => Some(OrderStatus::Created),
        PickupStatus::Confirmed => Some(OrderStatus::Confirmed),
        PickupStatus::Preparing => Some(OrderStatus::Preparing),
        PickupStatus::Ready => Some(OrderStatus::Ready),
        PickupStatus::Picked => Some(OrderStatus::Picked),
        PickupStatus::Rejected => None,
    }
}

/// Checks that a restaurant action moving a pickup to `target` is allowed
/// while the parent order is in `order_status`.
pub fn ensure_kitchen_action(order_status: OrderStatus, target: PickupStatus) -> AppResult<()> {
    let order_pos = order_rank(order_status).filter(|rank| *rank <= 3);
    let Some(order_pos) = order_pos else {
        return Err(AppError::unprocessable(format!(
            "order in status {} does not accept restaurant actions",
            order_status
        )));
    };

    if target == PickupStatus::Rejected {
        if order_status != OrderStatus::Created {
            return Err(AppError::unprocessable(format!(
                "order in status {} can no longer be rejected",
                order_status
            )));
        }
        return Ok(());
    }

    match pickup_rank(target) {
        Some(target_pos) if order_pos <= target_pos => Ok(()),
        _ => Err(AppError::unprocessable(format!(
            "order in status {} is already past {}",
            order_status, target
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregate {
    Unchanged,
    Advance(OrderStatus),
    Reject,
}

/// Derives what the parent order should do after one of its pickups moved.
///
/// Rejection finalizes the order when every pickup is rejected or the order
/// has a single pickup. Otherwise rejected pickups are ignored and the order
/// follows its slowest remaining pickup, never moving backwards.
pub fn aggregate(current: OrderStatus, pickups: &[PickupStatus]) -> Aggregate {
    if pickups.is_empty() {
        return Aggregate::Unchanged;
    }

    // A single-pickup order is covered here too.
    if pickups.iter().all(|p| *p == PickupStatus::Rejected) {
        return Aggregate::Reject;
    }

    let slowest = pickups
        .iter()
        .filter_map(|p| pickup_rank(*p).map(|rank| (rank, *p)))
        .min_by_key(|(rank, _)| *rank)
        .and_then(|(_, p)| order_status_for_pickup(p));

    match (slowest, order_rank(current)) {
        (Some(target), Some(current_pos)) => match order_rank(target) {
            Some(target_pos) if target_pos > current_pos => Aggregate::Advance(target),
            _ => Aggregate::Unchanged,
        },
        _ => Aggregate::Unchanged,
    }
}

/// Shortest chain of legal transitions leading from `from` to `to`,
/// excluding `from` itself.
pub fn advancement_path(from: OrderStatus, to: OrderStatus) -> AppResult<Vec<OrderStatus>> {
    if from == to {
        return Ok(Vec::new());
    }

    let mut previous: HashMap<OrderStatus, OrderStatus> = HashMap::new();
    let mut queue = VecDeque::from([from]);

    while let Some(current) = queue.pop_front() {
        for next in OrderStatus::ALL.iter().copied() {
            if next == from || previous.contains_key(&next) || !can_transition(current, next) {
                continue;
            }
            previous.insert(next, current);
            if next == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(prev) = previous.get(&cursor).copied() {
                    if prev == from {
                        break;
                    }
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                return Ok(path);
            }
            queue.push_back(next);
        }
    }

    Err(AppError::unprocessable(format!(
        "no transition path from {} to {}",
        from, to
    )))
}
