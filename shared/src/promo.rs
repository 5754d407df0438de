//! Promo code evaluation.
//!
//! `evaluate` is a pure function over an already loaded rule. It is used both
//! for the checkout preview and inside the order creation transaction, so it
//! never touches storage.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pricing::CartItem;
use crate::status::{PromoAppliesTo, PromoType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoRule {
    pub id: Uuid,
    pub code: String,
    pub promo_type: PromoType,
    /// Fixed amount, or percentage rate for `PERCENT` promos.
    pub discount_amount: BigDecimal,
    pub max_discount_cap: Option<BigDecimal>,
    pub min_order_amount: Option<BigDecimal>,
    pub cashback_amount: BigDecimal,
    pub max_total_uses: Option<i32>,
    pub total_uses: i32,
    pub max_uses_per_user: i32,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub applies_to: PromoAppliesTo,
    pub eligible_users: Vec<Uuid>,
    pub restaurant_ids: Vec<Uuid>,
    pub category_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoValidation {
    pub valid: bool,
    pub promo_id: Option<Uuid>,
    pub code: Option<String>,
    pub promo_type: Option<PromoType>,
    pub discount_amount: BigDecimal,
    pub cashback_amount: BigDecimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PromoValidation {
    fn rejected(rule: Option<&PromoRule>, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            promo_id: rule.map(|r| r.id),
            code: rule.map(|r| r.code.clone()),
            promo_type: None,
            discount_amount: BigDecimal::zero(),
            cashback_amount: BigDecimal::zero(),
            error_message: Some(message.into()),
        }
    }

    pub fn reason(&self) -> &str {
        self.error_message.as_deref().unwrap_or("promo code invalid")
    }
}

impl PromoRule {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.starts_at.map_or(true, |start| start <= now)
            && self.ends_at.map_or(true, |end| end >= now)
    }

    pub fn discount_for(&self, cart_total: &BigDecimal) -> BigDecimal {
        let mut discount = match self.promo_type {
            PromoType::Percent => {
                let raw = cart_total * &self.discount_amount / BigDecimal::from(100);
                match &self.max_discount_cap {
                    Some(cap) if raw > *cap => cap.clone(),
                    _ => raw,
                }
            }
            PromoType::Fixed => self.discount_amount.clone(),
        };
        if discount > *cart_total {
            discount = cart_total.clone();
        }
        discount
    }
}

/// Runs the promo checks in order and stops at the first failure.
pub fn evaluate(
    rule: Option<&PromoRule>,
    user_id: Uuid,
    user_usage_count: i64,
    cart: &[CartItem],
    cart_total: &BigDecimal,
    now: DateTime<Utc>,
) -> PromoValidation {
    let rule = match rule {
        Some(rule) if rule.is_live(now) => rule,
        _ => return PromoValidation::rejected(None, "promo code not found or expired"),
    };

    if let Some(max) = rule.max_total_uses {
        if rule.total_uses >= max {
            return PromoValidation::rejected(Some(rule), "promo usage limit reached");
        }
    }

    if user_usage_count >= i64::from(rule.max_uses_per_user) {
        return PromoValidation::rejected(
            Some(rule),
            "you have already used this promo code the maximum number of times",
        );
    }

    if let Some(min) = &rule.min_order_amount {
        if cart_total < min {
            return PromoValidation::rejected(
                Some(rule),
                format!("minimum order amount of {} not met", min),
            );
        }
    }

    if !rule.eligible_users.is_empty() && !rule.eligible_users.contains(&user_id) {
        return PromoValidation::rejected(Some(rule), "you are not eligible for this promo");
    }

    match rule.applies_to {
        PromoAppliesTo::SpecificRestaurant if !rule.restaurant_ids.is_empty() => {
            if cart
                .iter()
                .any(|item| !rule.restaurant_ids.contains(&item.restaurant_id))
            {
                return PromoValidation::rejected(
                    Some(rule),
                    "promo is not valid for all restaurants in your cart",
                );
            }
        }
        PromoAppliesTo::Category if !rule.category_ids.is_empty() => {
            let outside = cart.iter().any(|item| match item.category_id {
                Some(category) => !rule.category_ids.contains(&category),
                None => true,
            });
            if outside {
                return PromoValidation::rejected(
                    Some(rule),
                    "promo is not valid for all categories in your cart",
                );
            }
        }
        _ => {}
    }

    PromoValidation {
        valid: true,
        promo_id: Some(rule.id),
        code: Some(rule.code.clone()),
        promo_type: Some(rule.promo_type),
        discount_amount: rule.discount_for(cart_total),
        cashback_amount: rule.cashback_amount.clone(),
        error_message: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn rule(promo_type: PromoType, amount: &str) -> PromoRule {
        PromoRule {
            id: Uuid::new_v4(),
            code: "EID10".to_string(),
            promo_type,
            discount_amount: dec(amount),
            max_discount_cap: None,
            min_order_amount: None,
            cashback_amount: BigDecimal::zero(),
            max_total_uses: None,
            total_uses: 0,
            max_uses_per_user: 1,
            is_active: true,
            starts_at: None,
            ends_at: None,
            applies_to: PromoAppliesTo::All,
            eligible_users: Vec::new(),
            restaurant_ids: Vec::new(),
            category_ids: Vec::new(),
        }
    }

    fn line(restaurant: Uuid, category: Option<Uuid>) -> CartItem {
        CartItem {
            product_id: Uuid::new_v4(),
            restaurant_id: restaurant,
            category_id: category,
            product_name: "Biryani".to_string(),
            quantity: 1,
            unit_price: dec("2000"),
            modifier_price: BigDecimal::zero(),
            item_discount: BigDecimal::zero(),
            item_vat: BigDecimal::zero(),
            product_snapshot: None,
            selected_modifiers: None,
            special_instructions: None,
        }
    }

    #[test]
    fn percentage_discount_is_capped() {
        let mut promo = rule(PromoType::Percent, "10");
        promo.max_discount_cap = Some(dec("100"));
        let cart = vec![line(Uuid::new_v4(), None)];
        let result = evaluate(Some(&promo), Uuid::new_v4(), 0, &cart, &dec("2000"), Utc::now());
        assert!(result.valid);
        assert_eq!(result.discount_amount, dec("100"));
    }

    #[test]
    fn fixed_discount_never_exceeds_cart_total() {
        let promo = rule(PromoType::Fixed, "500");
        let result = evaluate(Some(&promo), Uuid::new_v4(), 0, &[], &dec("300"), Utc::now());
        assert_eq!(result.discount_amount, dec("300"));
    }

    #[test]
    fn missing_inactive_and_expired_codes_are_invalid() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        assert!(!evaluate(None, user, 0, &[], &dec("10"), now).valid);

        let mut inactive = rule(PromoType::Fixed, "10");
        inactive.is_active = false;
        assert!(!evaluate(Some(&inactive), user, 0, &[], &dec("10"), now).valid);

        let mut expired = rule(PromoType::Fixed, "10");
        expired.ends_at = Some(now - Duration::hours(1));
        let result = evaluate(Some(&expired), user, 0, &[], &dec("10"), now);
        assert_eq!(result.reason(), "promo code not found or expired");
    }

    #[test]
    fn usage_caps_are_checked_before_amounts() {
        let user = Uuid::new_v4();
        let mut promo = rule(PromoType::Fixed, "10");
        promo.max_total_uses = Some(5);
        promo.total_uses = 5;
        promo.min_order_amount = Some(dec("1000"));
        let result = evaluate(Some(&promo), user, 0, &[], &dec("10"), Utc::now());
        assert_eq!(result.reason(), "promo usage limit reached");

        promo.total_uses = 0;
        let result = evaluate(Some(&promo), user, 1, &[], &dec("10"), Utc::now());
        assert!(result.reason().contains("maximum number of times"));

        let result = evaluate(Some(&promo), user, 0, &[], &dec("10"), Utc::now());
        assert_eq!(result.reason(), "minimum order amount of 1000 not met");
    }

    #[test]
    fn eligibility_list_restricts_users() {
        let allowed = Uuid::new_v4();
        let mut promo = rule(PromoType::Fixed, "10");
        promo.eligible_users = vec![allowed];
        assert!(evaluate(Some(&promo), allowed, 0, &[], &dec("50"), Utc::now()).valid);
        assert!(!evaluate(Some(&promo), Uuid::new_v4(), 0, &[], &dec("50"), Utc::now()).valid);
    }

    #[test]
    fn scope_must_cover_every_cart_item() {
        let r1 = Uuid::new_v4();
        let r2 = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut promo = rule(PromoType::Fixed, "10");
        promo.applies_to = PromoAppliesTo::SpecificRestaurant;
        promo.restaurant_ids = vec![r1];

        let cart = vec![line(r1, None), line(r2, None)];
        let result = evaluate(Some(&promo), user, 0, &cart, &dec("50"), Utc::now());
        assert!(!result.valid);

        let cart = vec![line(r1, None)];
        assert!(evaluate(Some(&promo), user, 0, &cart, &dec("50"), Utc::now()).valid);

        let category = Uuid::new_v4();
        let mut promo = rule(PromoType::Fixed, "10");
        promo.applies_to = PromoAppliesTo::Category;
        promo.category_ids = vec![category];
        let cart = vec![line(r1, Some(category)), line(r2, None)];
        assert!(!evaluate(Some(&promo), user, 0, &cart, &dec("50"), Utc::now()).valid);
    }

    #[test]
    fn empty_scope_list_is_unrestricted() {
        let mut promo = rule(PromoType::Fixed, "10");
        promo.applies_to = PromoAppliesTo::SpecificRestaurant;
        let cart = vec![line(Uuid::new_v4(), None)];
        assert!(evaluate(Some(&promo), Uuid::new_v4(), 0, &cart, &dec("50"), Utc::now()).valid);
    }
}
