use bigdecimal::BigDecimal;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// One cart line as submitted by the client, prices already resolved from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub restaurant_id: Uuid,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    #[serde(default)]
    pub modifier_price: BigDecimal,
    #[serde(default)]
    pub item_discount: BigDecimal,
    #[serde(default)]
    pub item_vat: BigDecimal,
    #[serde(default)]
    pub product_snapshot: Option<serde_json::Value>,
    #[serde(default)]
    pub selected_modifiers: Option<serde_json::Value>,
    #[serde(default)]
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemPricing {
    pub subtotal: BigDecimal,
    pub discount: BigDecimal,
    pub vat: BigDecimal,
    pub promo_share: BigDecimal,
    pub total: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct CartPricing {
    pub items: Vec<ItemPricing>,
    pub subtotal: BigDecimal,
    pub item_discount_total: BigDecimal,
    pub vat_total: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTotals {
    pub subtotal: BigDecimal,
    pub item_discount_total: BigDecimal,
    pub promo_discount_total: BigDecimal,
    pub vat_total: BigDecimal,
    pub delivery_charge: BigDecimal,
    pub service_fee: BigDecimal,
    pub total_amount: BigDecimal,
}

/// Items of one restaurant, in the order the restaurant first appears in the cart.
#[derive(Debug, Clone)]
pub struct RestaurantGroup {
    pub restaurant_id: Uuid,
    pub item_indices: Vec<usize>,
    pub subtotal: BigDecimal,
    pub discount: BigDecimal,
    pub vat: BigDecimal,
    pub total: BigDecimal,
}

pub fn validate_cart(items: &[CartItem]) -> AppResult<()> {
    if items.is_empty() {
        return Err(AppError::bad_request("at least one item is required"));
    }
    for item in items {
        if item.quantity <= 0 {
            return Err(AppError::bad_request(format!(
                "quantity for {} must be positive",
                item.product_name
            )));
        }
        let prices = [
            &item.unit_price,
            &item.modifier_price,
            &item.item_discount,
            &item.item_vat,
        ];
        if prices.iter().any(|p| p.is_negative()) {
            return Err(AppError::bad_request(format!(
                "prices for {} must not be negative",
                item.product_name
            )));
        }
    }
    Ok(())
}

pub fn price_item(item: &CartItem) -> ItemPricing {
    let subtotal = (&item.unit_price + &item.modifier_price) * BigDecimal::from(item.quantity);
    let total = &subtotal - &item.item_discount + &item.item_vat;
    ItemPricing {
        subtotal,
        discount: item.item_discount.clone(),
        vat: item.item_vat.clone(),
        promo_share: BigDecimal::zero(),
        total,
    }
}

pub fn price_cart(items: &[CartItem]) -> CartPricing {
    let items: Vec<ItemPricing> = items.iter().map(price_item).collect();
    let mut subtotal = BigDecimal::zero();
    let mut item_discount_total = BigDecimal::zero();
    let mut vat_total = BigDecimal::zero();
    for item in &items {
        subtotal += &item.subtotal;
        item_discount_total += &item.discount;
        vat_total += &item.vat;
    }
    CartPricing {
        items,
        subtotal,
        item_discount_total,
        vat_total,
    }
}

/// Spreads the order-level promo discount over the items by subtotal weight.
/// Shares are rounded to two decimals and the last item takes the remainder,
/// so the shares always add up to `promo_total`.
pub fn allocate_promo(items: &mut [ItemPricing], promo_total: &BigDecimal) {
    for item in items.iter_mut() {
        item.promo_share = BigDecimal::zero();
    }
    if promo_total.is_zero() || items.is_empty() {
        return;
    }

    let weight: BigDecimal = items.iter().map(|i| &i.subtotal).sum();
    if weight.is_zero() {
        return;
    }

    let last = items.len() - 1;
    let mut allocated = BigDecimal::zero();
    for item in items[..last].iter_mut() {
        let share = (promo_total * &item.subtotal / &weight).round(2);
        allocated += &share;
        item.promo_share = share;
    }
    items[last].promo_share = promo_total - allocated;
}

pub fn group_by_restaurant(cart: &[CartItem], pricing: &[ItemPricing]) -> Vec<RestaurantGroup> {
    let mut groups: Vec<RestaurantGroup> = Vec::new();
    for (idx, (item, priced)) in cart.iter().zip(pricing).enumerate() {
        let group = match groups
            .iter_mut()
            .position(|g| g.restaurant_id == item.restaurant_id)
        {
            Some(pos) => &mut groups[pos],
            None => {
                groups.push(RestaurantGroup {
                    restaurant_id: item.restaurant_id,
                    item_indices: Vec::new(),
                    subtotal: BigDecimal::zero(),
                    discount: BigDecimal::zero(),
                    vat: BigDecimal::zero(),
                    total: BigDecimal::zero(),
                });
                let last = groups.len() - 1;
                &mut groups[last]
            }
        };
        group.item_indices.push(idx);
        group.subtotal += &priced.subtotal;
        group.discount += &priced.discount;
        group.vat += &priced.vat;
        group.total = &group.subtotal - &group.discount + &group.vat;
    }
    groups
}

/// `subtotal − item discounts − promo discount + VAT + delivery + service fee`, never below zero.
pub fn total_amount(
    subtotal: &BigDecimal,
    item_discount_total: &BigDecimal,
    promo_discount_total: &BigDecimal,
    vat_total: &BigDecimal,
    delivery_charge: &BigDecimal,
    service_fee: &BigDecimal,
) -> BigDecimal {
    let total = subtotal - item_discount_total - promo_discount_total
        + vat_total
        + delivery_charge
        + service_fee;
    if total.is_negative() {
        BigDecimal::zero()
    } else {
        total
    }
}

impl OrderTotals {
    pub fn compute(
        cart: &CartPricing,
        promo_discount_total: BigDecimal,
        delivery_charge: BigDecimal,
        service_fee: BigDecimal,
    ) -> Self {
        let total_amount = total_amount(
            &cart.subtotal,
            &cart.item_discount_total,
            &promo_discount_total,
            &cart.vat_total,
            &delivery_charge,
            &service_fee,
        );
        Self {
            subtotal: cart.subtotal.clone(),
            item_discount_total: cart.item_discount_total.clone(),
            promo_discount_total,
            vat_total: cart.vat_total.clone(),
            delivery_charge,
            service_fee,
            total_amount,
        }
    }
}

/// Strategy for the delivery fee of an order.
pub trait DeliveryPricing: Send + Sync {
    fn delivery_charge(&self, items: &[CartItem], subtotal: &BigDecimal) -> BigDecimal;
}

#[derive(Debug, Clone)]
pub struct FlatDeliveryCharge {
    pub amount: BigDecimal,
}

impl FlatDeliveryCharge {
    pub fn new(amount: BigDecimal) -> Self {
        Self { amount }
    }
}

impl Default for FlatDeliveryCharge {
    fn default() -> Self {
        Self::new(BigDecimal::from(60))
    }
}

impl DeliveryPricing for FlatDeliveryCharge {
    fn delivery_charge(&self, _items: &[CartItem], _subtotal: &BigDecimal) -> BigDecimal {
        self.amount.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn item(restaurant: Uuid, qty: i32, unit: &str) -> CartItem {
        CartItem {
            product_id: Uuid::new_v4(),
            restaurant_id: restaurant,
            category_id: None,
            product_name: "Kacchi".to_string(),
            quantity: qty,
            unit_price: dec(unit),
            modifier_price: BigDecimal::zero(),
            item_discount: BigDecimal::zero(),
            item_vat: BigDecimal::zero(),
            product_snapshot: None,
            selected_modifiers: None,
            special_instructions: None,
        }
    }

    #[test]
    fn line_total_includes_modifiers_discount_and_vat() {
        let mut line = item(Uuid::new_v4(), 2, "150");
        line.modifier_price = dec("20");
        line.item_discount = dec("10");
        line.item_vat = dec("17");
        let priced = price_item(&line);
        assert_eq!(priced.subtotal, dec("340"));
        assert_eq!(priced.total, dec("347"));
    }

    #[test]
    fn totals_are_floored_at_zero() {
        let total = total_amount(
            &dec("100"),
            &dec("50"),
            &dec("200"),
            &dec("0"),
            &dec("60"),
            &dec("0"),
        );
        assert_eq!(total, BigDecimal::zero());

        let total = total_amount(
            &dec("500"),
            &dec("20"),
            &dec("30"),
            &dec("25"),
            &dec("60"),
            &dec("5"),
        );
        assert_eq!(total, dec("540"));
    }

    #[test]
    fn restaurants_are_grouped_in_cart_order() {
        let r1 = Uuid::new_v4();
        let r2 = Uuid::new_v4();
        let cart = vec![item(r2, 1, "100"), item(r1, 2, "50"), item(r2, 3, "10")];
        let priced = price_cart(&cart);
        let groups = group_by_restaurant(&cart, &priced.items);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].restaurant_id, r2);
        assert_eq!(groups[0].item_indices, vec![0, 2]);
        assert_eq!(groups[0].subtotal, dec("130"));
        assert_eq!(groups[1].subtotal, dec("100"));

        let sum: BigDecimal = groups.iter().map(|g| &g.subtotal).sum();
        assert_eq!(sum, priced.subtotal);
    }

    #[test]
    fn promo_shares_sum_to_the_discount() {
        let r = Uuid::new_v4();
        let cart = vec![item(r, 1, "100"), item(r, 1, "100"), item(r, 1, "100")];
        let mut priced = price_cart(&cart);
        allocate_promo(&mut priced.items, &dec("100"));

        assert_eq!(priced.items[0].promo_share, dec("33.33"));
        assert_eq!(priced.items[1].promo_share, dec("33.33"));
        assert_eq!(priced.items[2].promo_share, dec("33.34"));
        let sum: BigDecimal = priced.items.iter().map(|i| &i.promo_share).sum();
        assert_eq!(sum, dec("100"));
    }

    #[test]
    fn empty_carts_and_bad_quantities_are_rejected() {
        assert!(validate_cart(&[]).is_err());
        let bad = item(Uuid::new_v4(), 0, "10");
        assert_eq!(validate_cart(&[bad]).unwrap_err().http_status(), 400);
    }

    #[test]
    fn flat_delivery_defaults_to_sixty() {
        let pricing = FlatDeliveryCharge::default();
        assert_eq!(pricing.delivery_charge(&[], &dec("10")), dec("60"));
    }
}
