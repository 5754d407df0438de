use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{ActorType, OrderStatus, PaymentMethod};

pub const AGGREGATE_ORDER: &str = "order";

pub const ORDER_CREATED: &str = "order.created";
pub const ORDER_STATUS_CHANGED: &str = "order.status_changed";
pub const ORDER_PAID: &str = "order.paid";
pub const ORDER_CANCELLED: &str = "order.cancelled";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub total_amount: BigDecimal,
    pub restaurant_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusChangedEvent {
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub previous_status: OrderStatus,
    pub new_status: OrderStatus,
    pub actor_type: ActorType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPaidEvent {
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub transaction_id: Uuid,
    pub payment_method: PaymentMethod,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub previous_status: OrderStatus,
    pub reason: String,
    pub actor_type: ActorType,
}

/// Bounded exponential backoff for outbox deliveries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::seconds(10),
            max_delay: Duration::minutes(10),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try, after `attempts` failed deliveries.
    pub fn backoff(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;
        let delay = self.base_delay * 2i32.pow(exponent);
        delay.min(self.max_delay)
    }

    pub fn next_attempt_at(&self, attempts: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.backoff(attempts)
    }

    pub fn exhausted(&self, attempts: i32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::seconds(10));
        assert_eq!(policy.backoff(2), Duration::seconds(20));
        assert_eq!(policy.backoff(4), Duration::seconds(80));
        assert_eq!(policy.backoff(8), Duration::minutes(10));
        assert_eq!(policy.backoff(40), Duration::minutes(10));
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(4));
        assert!(policy.exhausted(5));
    }
}
