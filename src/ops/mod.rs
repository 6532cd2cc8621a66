use sea_orm::DbErr;
use thiserror::Error;
use tracing::info;

use crate::db::entities::subscription;
use crate::db::services::server_service;
use crate::db::services::subscription_service::{
    self, NewSubscription, SubscriptionChanges,
};
use crate::panel::manager;
use crate::state::AppState;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("subscription not found")]
    NotFound,
    #[error("remark already in use: {0}")]
    RemarkTaken(String),
    #[error("the fleet rejected the {0} operation")]
    RemoteRejected(&'static str),
    #[error(transparent)]
    Store(#[from] DbErr),
}

/// Admin mutations on one subscription. Each variant owns its input
/// contract; `apply` routes it to the store change and, where one is
/// required, the matching fleet operation.
#[derive(Debug, Clone)]
pub enum SubscriptionCommand {
    Rename(String),
    Expire {
        duration_secs: i64,
        after_first_use: bool,
    },
    LimitUsage(i64),
    ToggleEnabled,
    Revoke,
    ResetUsage,
    Remove,
}

pub struct CreateSubscription {
    pub remark: String,
    pub expire_secs: i64,
    pub after_first_use: bool,
    pub limit_usage: i64,
}

/// Provision a new subscription: reserve the remark, push the fresh
/// identity to the whole fleet, then persist the row. The store write only
/// happens once every reachable inbound carries the client.
pub async fn create_subscription(
    state: &AppState,
    input: CreateSubscription,
) -> Result<subscription::Model, OpsError> {
    if subscription_service::get_by_remark(&state.db, &input.remark)
        .await?
        .is_some()
    {
        return Err(OpsError::RemarkTaken(input.remark));
    }

    let server_key = subscription_service::generate_server_key();
    let targets = server_service::get_available_targets(&state.db, &state.cipher).await?;
    if !manager::create(state.panel.as_ref(), &targets, &server_key).await {
        return Err(OpsError::RemoteRejected("create"));
    }

    let sub = subscription_service::create(
        &state.db,
        NewSubscription {
            remark: input.remark,
            server_key,
            access_key: subscription_service::generate_access_key(),
            expire: subscription_service::generate_expire(
                input.expire_secs,
                input.after_first_use,
            ),
            limit_usage: input.limit_usage,
        },
    )
    .await?;
    info!(sub_id = sub.id, remark = %sub.remark, "subscription provisioned");
    Ok(sub)
}

pub async fn apply(
    state: &AppState,
    sub_id: i64,
    command: SubscriptionCommand,
) -> Result<subscription::Model, OpsError> {
    let current = subscription_service::get_by_id(&state.db, sub_id)
        .await?
        .ok_or(OpsError::NotFound)?;
    let db = &state.db;

    match command {
        SubscriptionCommand::Rename(remark) => {
            if subscription_service::get_by_remark(db, &remark).await?.is_some() {
                return Err(OpsError::RemarkTaken(remark));
            }
            Ok(subscription_service::update(
                db,
                current.subscription,
                SubscriptionChanges {
                    remark: Some(remark),
                    ..Default::default()
                },
            )
            .await?)
        }
        SubscriptionCommand::Expire {
            duration_secs,
            after_first_use,
        } => Ok(subscription_service::update(
            db,
            current.subscription,
            SubscriptionChanges {
                expire: Some(subscription_service::generate_expire(
                    duration_secs,
                    after_first_use,
                )),
                ..Default::default()
            },
        )
        .await?),
        SubscriptionCommand::LimitUsage(bytes) => Ok(subscription_service::update(
            db,
            current.subscription,
            SubscriptionChanges {
                limit_usage: Some(bytes),
                ..Default::default()
            },
        )
        .await?),
        SubscriptionCommand::ToggleEnabled => {
            let targets =
                server_service::get_available_targets(db, &state.cipher).await?;
            let key = current.subscription.server_key.clone();
            let succeeded = if current.is_active() {
                manager::deactivate(state.panel.as_ref(), &targets, &key).await
            } else {
                manager::activate(state.panel.as_ref(), &targets, &key).await
            };
            if !succeeded {
                return Err(OpsError::RemoteRejected("toggle"));
            }
            let enabled = !current.subscription.enabled;
            Ok(subscription_service::update(
                db,
                current.subscription,
                SubscriptionChanges {
                    enabled: Some(enabled),
                    ..Default::default()
                },
            )
            .await?)
        }
        SubscriptionCommand::Revoke => {
            let targets =
                server_service::get_available_targets(db, &state.cipher).await?;
            let new_key = subscription_service::generate_server_key();
            let succeeded = manager::revoke(
                state.panel.as_ref(),
                &targets,
                &current.subscription.server_key,
                &new_key,
                current.is_active(),
            )
            .await;
            if !succeeded {
                return Err(OpsError::RemoteRejected("revoke"));
            }
            info!(sub_id, "subscription identity rotated");
            Ok(subscription_service::update(
                db,
                current.subscription,
                SubscriptionChanges {
                    server_key: Some(new_key),
                    ..Default::default()
                },
            )
            .await?)
        }
        SubscriptionCommand::ResetUsage => {
            Ok(subscription_service::reset_usage(db, &current).await?)
        }
        SubscriptionCommand::Remove => {
            let targets =
                server_service::get_available_targets(db, &state.cipher).await?;
            let succeeded = manager::remove(
                state.panel.as_ref(),
                &targets,
                &current.subscription.server_key,
            )
            .await;
            if !succeeded {
                return Err(OpsError::RemoteRejected("remove"));
            }
            let sub = current.subscription.clone();
            subscription_service::remove(db, current.subscription).await?;
            info!(sub_id, remark = %sub.remark, "subscription removed");
            Ok(subscription::Model {
                removed: true,
                ..sub
            })
        }
    }
}
