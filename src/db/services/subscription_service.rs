use chrono::Utc;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    ModelTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::db::entities::{subscription, subscription_usage};

/// A subscription row together with every usage record ever observed for
/// it. All derived predicates are computed over this pair; nothing below
/// touches the store.
#[derive(Debug, Clone)]
pub struct SubscriptionState {
    pub subscription: subscription::Model,
    pub usages: Vec<subscription_usage::Model>,
}

impl SubscriptionState {
    pub fn lifetime_usage(&self) -> i64 {
        self.usages.iter().map(|u| u.usage).sum()
    }

    pub fn current_usage(&self) -> i64 {
        self.lifetime_usage() - self.subscription.offset_usage
    }

    pub fn left_usage(&self) -> i64 {
        if self.subscription.limit_usage != 0 {
            self.subscription.limit_usage - self.current_usage()
        } else {
            0
        }
    }

    pub fn limited(&self) -> bool {
        self.subscription.limit_usage != 0
            && self.current_usage() >= self.subscription.limit_usage
    }

    /// The single desired-state signal the reconciliation engine and the
    /// drift loop consume: should this identity be active anywhere.
    pub fn availabled_at(&self, now: i64) -> bool {
        let sub = &self.subscription;
        sub.enabled && sub.activated && !sub.removed && !sub.expired_at(now) && !self.limited()
    }

    pub fn availabled(&self) -> bool {
        self.availabled_at(Utc::now().timestamp())
    }

    pub fn is_active(&self) -> bool {
        self.availabled()
    }

    /// Instant of the most recent usage report, if any.
    pub fn online_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.usages
            .iter()
            .map(|u| u.updated_at.unwrap_or(u.created_at))
            .max()
    }
}

pub fn generate_server_key() -> String {
    Uuid::new_v4().to_string()
}

pub fn generate_access_key() -> String {
    let bytes: [u8; 8] = rand::rng().random();
    hex::encode(bytes)
}

/// Encode an admin-supplied duration into the stored `expire` value: the
/// clock either starts now (absolute deadline) or on first external access
/// (negative pending duration).
pub fn generate_expire(duration_secs: i64, after_first_use: bool) -> i64 {
    if after_first_use {
        -duration_secs
    } else {
        Utc::now().timestamp() + duration_secs
    }
}

/// Absolute deadline for a pending expiry, or `None` when the clock has
/// already started (making `activate_expire` idempotent).
pub fn pending_expire_activation(expire: i64, now: i64) -> Option<i64> {
    (expire < 0).then(|| now + expire.abs())
}

pub struct NewSubscription {
    pub remark: String,
    pub server_key: String,
    pub access_key: String,
    pub expire: i64,
    pub limit_usage: i64,
}

#[derive(Debug, Default, Clone)]
pub struct SubscriptionChanges {
    pub remark: Option<String>,
    pub expire: Option<i64>,
    pub limit_usage: Option<i64>,
    pub enabled: Option<bool>,
    pub activated: Option<bool>,
    pub removed: Option<bool>,
    pub server_key: Option<String>,
}

pub async fn create(
    db: &DatabaseConnection,
    new: NewSubscription,
) -> Result<subscription::Model, DbErr> {
    subscription::ActiveModel {
        enabled: Set(true),
        activated: Set(true),
        removed: Set(false),
        remark: Set(new.remark),
        server_key: Set(new.server_key),
        access_key: Set(new.access_key),
        expire: Set(new.expire),
        limit_usage: Set(new.limit_usage),
        offset_usage: Set(0),
        last_sub_updated_at: Set(None),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn update(
    db: &DatabaseConnection,
    sub: subscription::Model,
    changes: SubscriptionChanges,
) -> Result<subscription::Model, DbErr> {
    let mut active = sub.into_active_model();
    if let Some(remark) = changes.remark {
        active.remark = Set(remark);
    }
    if let Some(expire) = changes.expire {
        active.expire = Set(expire);
    }
    if let Some(limit_usage) = changes.limit_usage {
        active.limit_usage = Set(limit_usage);
    }
    if let Some(enabled) = changes.enabled {
        active.enabled = Set(enabled);
    }
    if let Some(activated) = changes.activated {
        active.activated = Set(activated);
    }
    if let Some(removed) = changes.removed {
        active.removed = Set(removed);
    }
    if let Some(server_key) = changes.server_key {
        active.server_key = Set(server_key);
    }
    active.updated_at = Set(Some(Utc::now()));
    active.update(db).await
}

/// Soft delete. Usage history must outlive the subscription, so rows are
/// never physically erased.
pub async fn remove(db: &DatabaseConnection, sub: subscription::Model) -> Result<(), DbErr> {
    let mut active = sub.into_active_model();
    active.removed = Set(true);
    active.updated_at = Set(Some(Utc::now()));
    active.update(db).await?;
    Ok(())
}

/// Start the expiry clock of a pending subscription. Called from the
/// link-serving path on first external access, never from the drift loop.
/// No-op when the clock already runs.
pub async fn activate_expire(
    db: &DatabaseConnection,
    sub: subscription::Model,
) -> Result<subscription::Model, DbErr> {
    let now = Utc::now();
    let Some(deadline) = pending_expire_activation(sub.expire, now.timestamp()) else {
        return Ok(sub);
    };
    let mut active = sub.into_active_model();
    active.expire = Set(deadline);
    active.updated_at = Set(Some(now));
    active.update(db).await
}

pub async fn touch_last_sub_update(
    db: &DatabaseConnection,
    sub: subscription::Model,
) -> Result<subscription::Model, DbErr> {
    let now = Utc::now();
    let mut active = sub.into_active_model();
    active.last_sub_updated_at = Set(Some(now));
    active.update(db).await
}

/// Zero out the billable counter by folding lifetime usage into the
/// offset. Usage records themselves are untouched.
pub async fn reset_usage(
    db: &DatabaseConnection,
    state: &SubscriptionState,
) -> Result<subscription::Model, DbErr> {
    let lifetime = state.lifetime_usage();
    let mut active = state.subscription.clone().into_active_model();
    active.offset_usage = Set(lifetime);
    active.updated_at = Set(Some(Utc::now()));
    active.update(db).await
}

async fn load_state(
    db: &DatabaseConnection,
    sub: subscription::Model,
) -> Result<SubscriptionState, DbErr> {
    let usages = sub.find_related(subscription_usage::Entity).all(db).await?;
    Ok(SubscriptionState {
        subscription: sub,
        usages,
    })
}

pub async fn get_by_id(
    db: &DatabaseConnection,
    id: i64,
) -> Result<Option<SubscriptionState>, DbErr> {
    let found = subscription::Entity::find_by_id(id)
        .filter(subscription::not_removed())
        .one(db)
        .await?;
    match found {
        Some(sub) => Ok(Some(load_state(db, sub).await?)),
        None => Ok(None),
    }
}

pub async fn get_by_access_key(
    db: &DatabaseConnection,
    key: &str,
) -> Result<Option<SubscriptionState>, DbErr> {
    let found = subscription::Entity::find()
        .filter(subscription::Column::AccessKey.eq(key))
        .filter(subscription::not_removed())
        .one(db)
        .await?;
    match found {
        Some(sub) => Ok(Some(load_state(db, sub).await?)),
        None => Ok(None),
    }
}

pub async fn get_by_server_key(
    db: &DatabaseConnection,
    key: &str,
) -> Result<Option<SubscriptionState>, DbErr> {
    let found = subscription::Entity::find()
        .filter(subscription::Column::ServerKey.eq(key))
        .filter(subscription::not_removed())
        .one(db)
        .await?;
    match found {
        Some(sub) => Ok(Some(load_state(db, sub).await?)),
        None => Ok(None),
    }
}

/// Remark uniqueness check; removed rows do not reserve their label.
pub async fn get_by_remark(
    db: &DatabaseConnection,
    remark: &str,
) -> Result<Option<subscription::Model>, DbErr> {
    subscription::Entity::find()
        .filter(subscription::Column::Remark.eq(remark))
        .filter(subscription::not_removed())
        .one(db)
        .await
}

/// Load every tracked subscription with its usage records. `removed: None`
/// includes soft-deleted rows — the drift loop needs them to clean their
/// remote clients up.
pub async fn get_all(
    db: &DatabaseConnection,
    removed: Option<bool>,
) -> Result<Vec<SubscriptionState>, DbErr> {
    let mut query = subscription::Entity::find();
    if let Some(flag) = removed {
        query = query.filter(subscription::Column::Removed.eq(flag));
    }
    let rows = query
        .order_by_desc(subscription::Column::CreatedAt)
        .find_with_related(subscription_usage::Entity)
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(subscription, usages)| SubscriptionState {
            subscription,
            usages,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use sea_orm::{DatabaseBackend, DbBackend, MockDatabase, QueryTrait};

    use super::*;

    const GIB: i64 = 1024 * 1024 * 1024;

    fn sub_fixture() -> subscription::Model {
        subscription::Model {
            id: 1,
            enabled: true,
            activated: true,
            removed: false,
            remark: "alice".to_string(),
            server_key: "7f9c61a2-0f6b-4e0d-9a42-1f2e3d4c5b6a".to_string(),
            access_key: "00112233aabbccdd".to_string(),
            expire: 0,
            limit_usage: 0,
            offset_usage: 0,
            last_sub_updated_at: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn usage_row(id: i64, usage: i64) -> subscription_usage::Model {
        subscription_usage::Model {
            id,
            sub_id: 1,
            server_id: 1,
            inbound_id: 1,
            client_id: id,
            usage,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn state(sub: subscription::Model, usages: Vec<subscription_usage::Model>) -> SubscriptionState {
        SubscriptionState {
            subscription: sub,
            usages,
        }
    }

    #[test]
    fn usage_accounting_invariants_hold() {
        let mut sub = sub_fixture();
        sub.offset_usage = 2 * GIB;
        let state = state(sub, vec![usage_row(1, 3 * GIB), usage_row(2, 7 * GIB)]);

        assert_eq!(state.lifetime_usage(), 10 * GIB);
        assert_eq!(state.current_usage(), 8 * GIB);
    }

    #[test]
    fn reset_folds_lifetime_into_offset() {
        let mut sub = sub_fixture();
        let usages = vec![usage_row(1, 4 * GIB), usage_row(2, 6 * GIB)];
        sub.offset_usage = state(sub.clone(), usages.clone()).lifetime_usage();
        let after = state(sub, usages);

        assert_eq!(after.subscription.offset_usage, 10 * GIB);
        assert_eq!(after.current_usage(), 0);
    }

    #[test]
    fn limited_triggers_at_exactly_the_cap() {
        let mut sub = sub_fixture();
        sub.limit_usage = 10 * GIB;
        let exactly = state(sub.clone(), vec![usage_row(1, 10 * GIB)]);
        assert!(exactly.limited());
        assert!(!exactly.availabled());

        let under = state(sub.clone(), vec![usage_row(1, 10 * GIB - 1)]);
        assert!(!under.limited());
        assert!(under.availabled());

        sub.limit_usage = 0;
        let unlimited = state(sub, vec![usage_row(1, 100 * GIB)]);
        assert!(!unlimited.limited());
        assert_eq!(unlimited.left_usage(), 0);
    }

    #[test]
    fn expiry_semantics_cover_all_three_encodings() {
        let now = Utc::now().timestamp();
        let mut sub = sub_fixture();

        sub.expire = 0;
        assert!(!sub.expired_at(now));
        assert!(!sub.is_pending_activation());

        sub.expire = now - 1;
        assert!(sub.expired_at(now));
        assert!(!state(sub.clone(), vec![]).availabled_at(now));

        sub.expire = now + 3600;
        assert!(!sub.expired_at(now));

        sub.expire = -86400;
        assert!(sub.is_pending_activation());
        assert!(!sub.expired_at(now));
    }

    #[test]
    fn pending_expiry_activates_once() {
        let now = 1_700_000_000;
        assert_eq!(pending_expire_activation(-86400, now), Some(now + 86400));
        assert_eq!(pending_expire_activation(0, now), None);
        assert_eq!(pending_expire_activation(now + 86400, now), None);
    }

    #[test]
    fn generated_expire_encodes_the_start_mode() {
        assert_eq!(generate_expire(86400, true), -86400);
        let immediate = generate_expire(86400, false);
        assert!(immediate > Utc::now().timestamp());
    }

    #[test]
    fn generated_keys_have_expected_shape() {
        assert_eq!(generate_access_key().len(), 16);
        assert!(Uuid::parse_str(&generate_server_key()).is_ok());
        assert_ne!(generate_server_key(), generate_server_key());
    }

    #[test]
    fn availabled_requires_every_flag() {
        let now = Utc::now().timestamp();

        let mut sub = sub_fixture();
        sub.enabled = false;
        assert!(!state(sub, vec![]).availabled_at(now));

        let mut sub = sub_fixture();
        sub.activated = false;
        assert!(!state(sub, vec![]).availabled_at(now));

        let mut sub = sub_fixture();
        sub.removed = true;
        assert!(!state(sub, vec![]).availabled_at(now));

        assert!(state(sub_fixture(), vec![]).availabled_at(now));
    }

    #[test]
    fn online_at_tracks_latest_report() {
        let mut first = usage_row(1, GIB);
        let mut second = usage_row(2, GIB);
        let earlier = Utc::now() - chrono::Duration::hours(2);
        let later = Utc::now();
        first.created_at = earlier;
        first.updated_at = None;
        second.created_at = earlier;
        second.updated_at = Some(later);

        let state = state(sub_fixture(), vec![first, second]);
        assert_eq!(state.online_at(), Some(later));
        assert_eq!(super::SubscriptionState { subscription: sub_fixture(), usages: vec![] }.online_at(), None);
    }

    #[tokio::test]
    async fn activate_expire_is_a_noop_for_running_clocks() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let mut sub = sub_fixture();
        sub.expire = Utc::now().timestamp() + 3600;
        let before = sub.expire;

        let after = activate_expire(&db, sub).await.unwrap();
        assert_eq!(after.expire, before);
        assert!(db.into_transaction_log().is_empty());
    }

    #[test]
    fn store_filter_matches_in_memory_removed_check() {
        let sql = subscription::Entity::find()
            .filter(subscription::not_removed())
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#""subscriptions"."removed" = FALSE"#));

        let mut kept = sub_fixture();
        kept.removed = false;
        let mut dropped = sub_fixture();
        dropped.removed = true;
        assert!(!kept.removed);
        assert!(dropped.removed);
    }
}
