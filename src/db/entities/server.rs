use sea_orm::entity::prelude::*;
use sea_orm::Condition;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "servers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub remark: String,
    pub enabled: bool,
    pub removed: bool,
    /// Connection settings for the panel: host, credentials and the
    /// optional public subscription base URL.
    #[sea_orm(column_type = "JsonBinary")]
    pub config: Json,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::server_access::Entity")]
    ServerAccess,
    #[sea_orm(has_many = "super::subscription_usage::Entity")]
    SubscriptionUsage,
}

impl Related<super::server_access::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ServerAccess.def()
    }
}

impl Related<super::subscription_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SubscriptionUsage.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Typed view over the `config` JSON column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub sub_host: Option<String>,
}

impl Model {
    pub fn availabled(&self) -> bool {
        self.enabled && !self.removed
    }

    pub fn panel_config(&self) -> Option<PanelConfig> {
        serde_json::from_value(self.config.clone()).ok()
    }
}

/// Store-side counterpart of `Model::availabled`. The two definitions are
/// pinned against each other in tests.
pub fn availabled() -> Condition {
    Condition::all()
        .add(Column::Enabled.eq(true))
        .add(Column::Removed.eq(false))
}
