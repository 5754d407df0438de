use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::db::models::{NewPromoUsage, Promo};
use shared::db::schema::{promo_categories, promo_eligible_users, promo_restaurants, promo_usages, promos};
use shared::pricing::CartItem;
use shared::promo::{evaluate, PromoRule, PromoValidation};
use shared::{AppError, AppResult};
use uuid::Uuid;

pub async fn load_rule(conn: &mut AsyncPgConnection, tenant_id: Uuid, code: &str) -> AppResult<Option<PromoRule>> {
    let promo = promos::table
        .filter(promos::tenant_id.eq(tenant_id))
        .filter(promos::code.eq(code))
        .select(Promo::as_select())
        .first(conn)
        .await
        .optional()?;

    let Some(promo) = promo else {
        return Ok(None);
    };

    let eligible_users = promo_eligible_users::table
        .filter(promo_eligible_users::promo_id.eq(promo.id))
        .select(promo_eligible_users::user_id)
        .load::<Uuid>(conn)
        .await?;
    let restaurant_ids = promo_restaurants::table
        .filter(promo_restaurants::promo_id.eq(promo.id))
        .select(promo_restaurants::restaurant_id)
        .load::<Uuid>(conn)
        .await?;
    let category_ids = promo_categories::table
        .filter(promo_categories::promo_id.eq(promo.id))
        .select(promo_categories::category_id)
        .load::<Uuid>(conn)
        .await?;

    Ok(Some(PromoRule {
        id: promo.id,
        code: promo.code,
        promo_type: promo.promo_type.parse()?,
        discount_amount: promo.discount_amount,
        max_discount_cap: promo.max_discount_cap,
        min_order_amount: promo.min_order_amount,
        cashback_amount: promo.cashback_amount,
        max_total_uses: promo.max_total_uses,
        total_uses: promo.total_uses,
        max_uses_per_user: promo.max_uses_per_user,
        is_active: promo.is_active,
        starts_at: promo.starts_at,
        ends_at: promo.ends_at,
        applies_to: promo.applies_to.parse()?,
        eligible_users,
        restaurant_ids,
        category_ids,
    }))
}

pub async fn user_usage_count(conn: &mut AsyncPgConnection, promo_id: Uuid, user_id: Uuid) -> AppResult<i64> {
    let count = promo_usages::table
        .filter(promo_usages::promo_id.eq(promo_id))
        .filter(promo_usages::user_id.eq(user_id))
        .count()
        .get_result::<i64>(conn)
        .await?;
    Ok(count)
}

/// Loads the rule for `code` and evaluates it against the cart. Writes nothing.
pub async fn validate(
    conn: &mut AsyncPgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
    code: &str,
    cart: &[CartItem],
    cart_total: &BigDecimal,
    now: DateTime<Utc>,
) -> AppResult<(Option<PromoRule>, PromoValidation)> {
    let rule = load_rule(conn, tenant_id, code).await?;
    let usage = match &rule {
        Some(rule) => user_usage_count(conn, rule.id, user_id).await?,
        None => 0,
    };
    let result = evaluate(rule.as_ref(), user_id, usage, cart, cart_total, now);
    Ok((rule, result))
}

/// Records a redemption. The global counter moves with one conditional
/// update, which also locks the promo row; the per-user count is checked
/// again under that lock.
pub async fn redeem(
    conn: &mut AsyncPgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
    order_id: Uuid,
    rule: &PromoRule,
    validation: &PromoValidation,
) -> AppResult<()> {
    let updated = diesel::update(
        promos::table
            .filter(promos::id.eq(rule.id))
            .filter(promos::tenant_id.eq(tenant_id))
            .filter(
                promos::max_total_uses
                    .is_null()
                    .or(promos::total_uses.nullable().lt(promos::max_total_uses)),
            ),
    )
    .set((
        promos::total_uses.eq(promos::total_uses + 1),
        promos::total_discount_given.eq(promos::total_discount_given + validation.discount_amount.clone()),
    ))
    .execute(conn)
    .await?;

    if updated == 0 {
        return Err(AppError::bad_request("promo code invalid: promo usage limit reached"));
    }

    let used = user_usage_count(conn, rule.id, user_id).await?;
    if used >= i64::from(rule.max_uses_per_user) {
        return Err(AppError::bad_request(
            "promo code invalid: you have already used this promo code the maximum number of times",
        ));
    }

    diesel::insert_into(promo_usages::table)
        .values(&NewPromoUsage {
            id: Uuid::new_v4(),
            promo_id: rule.id,
            user_id,
            order_id,
            tenant_id,
            discount_amount: validation.discount_amount.clone(),
            cashback_amount: validation.cashback_amount.clone(),
        })
        .execute(conn)
        .await?;
    Ok(())
}
