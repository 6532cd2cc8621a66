use sea_orm::entity::prelude::*;
use sea_orm::Condition;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub enabled: bool,
    pub activated: bool,
    pub removed: bool,
    #[sea_orm(unique)]
    pub remark: String,
    /// Identity token correlating this subscription with its remote client
    /// inside every inbound of every panel.
    pub server_key: String,
    /// Public lookup token used by the subscription link endpoint.
    pub access_key: String,
    /// Epoch seconds. `0` = unlimited, `> 0` = absolute deadline,
    /// `< 0` = relative duration that starts on first external access.
    pub expire: i64,
    /// Bytes; `0` = unlimited.
    pub limit_usage: i64,
    /// Bytes subtracted from lifetime usage by reset operations.
    pub offset_usage: i64,
    pub last_sub_updated_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::subscription_usage::Entity")]
    SubscriptionUsage,
}

impl Related<super::subscription_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SubscriptionUsage.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn expired_at(&self, now: i64) -> bool {
        self.expire > 0 && now > self.expire
    }

    pub fn expired(&self) -> bool {
        self.expired_at(chrono::Utc::now().timestamp())
    }

    /// The expiry clock has not started yet; it is armed by the first
    /// externally-triggered resolution of this subscription.
    pub fn is_pending_activation(&self) -> bool {
        self.expire < 0
    }

    pub fn link(&self, domain_prefix: &str) -> String {
        format!(
            "{}/guards/{}",
            domain_prefix.trim_end_matches('/'),
            self.access_key
        )
    }
}

/// Store-side counterpart of the "tracked subscription" filter. Must stay
/// in agreement with the in-memory `removed` flag checks.
pub fn not_removed() -> Condition {
    Condition::all().add(Column::Removed.eq(false))
}
