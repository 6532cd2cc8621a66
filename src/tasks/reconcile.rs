use std::collections::HashMap;

use futures::future::join_all;
use sea_orm::{DatabaseConnection, DbErr};
use tracing::{error, info, warn};

use crate::db::services::{server_service, subscription_service, usage_service};
use crate::panel::{ClientStats, PanelClient};
use crate::security::CredentialCipher;

/// The one corrective step that closes the gap between a subscription's
/// desired state and the remote client observed on a single inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftAction {
    CreateClient,
    RemoveClient,
    Deactivate,
    Activate,
    Nothing,
}

/// Desired vs. observed. `availabled` is the single desired-state signal;
/// a removed subscription always resolves to cleanup, whatever the remote
/// enable flag says.
pub fn diagnose(availabled: bool, removed: bool, client: Option<&ClientStats>) -> DriftAction {
    match client {
        None => {
            if availabled {
                DriftAction::CreateClient
            } else {
                DriftAction::Nothing
            }
        }
        Some(client) => {
            if removed {
                DriftAction::RemoveClient
            } else if client.enable && !availabled {
                DriftAction::Deactivate
            } else if !client.enable && availabled {
                DriftAction::Activate
            } else {
                DriftAction::Nothing
            }
        }
    }
}

/// One reconciliation pass over the whole fleet.
///
/// Inbound listings are fetched concurrently, one task per server; every
/// corrective action is a single-inbound call whose failure is logged and
/// never stops the rest of the pass. The caller guarantees passes do not
/// overlap.
pub async fn reconcile_subscriptions(
    db: &DatabaseConnection,
    panel: &dyn PanelClient,
    cipher: &CredentialCipher,
) -> Result<(), DbErr> {
    let subs = subscription_service::get_all(db, None).await?;
    if subs.is_empty() {
        info!("no subscriptions to reconcile");
        return Ok(());
    }
    let targets = server_service::get_available_targets(db, cipher).await?;
    if targets.is_empty() {
        info!("no available servers to reconcile against");
        return Ok(());
    }

    let listings = join_all(targets.iter().map(|target| async move {
        match panel.inbounds(target).await {
            Ok(inbounds) => Some((target, inbounds)),
            Err(err) => {
                warn!(server_id = target.server_id, error = %err, "failed to list inbounds");
                None
            }
        }
    }))
    .await;

    for (target, inbounds) in listings.iter().flatten() {
        if inbounds.is_empty() {
            warn!(server_id = target.server_id, "no inbounds found");
            continue;
        }
        for inbound in inbounds {
            let clients: HashMap<&str, &ClientStats> = inbound
                .client_stats
                .iter()
                .map(|c| (c.sub_id.as_str(), c))
                .collect();

            for sub in &subs {
                let key = sub.subscription.server_key.as_str();
                let client = clients.get(key).copied();

                if let Some(client) = client {
                    if let Err(err) = usage_service::upsert_usage(
                        db,
                        sub.subscription.id,
                        target.server_id,
                        inbound.id,
                        client.id,
                        client.all_time,
                    )
                    .await
                    {
                        error!(
                            sub_id = sub.subscription.id,
                            server_id = target.server_id,
                            inbound_id = inbound.id,
                            error = %err,
                            "failed to record usage"
                        );
                    }
                }

                let action = diagnose(sub.availabled(), sub.subscription.removed, client);
                let result = match action {
                    DriftAction::CreateClient => {
                        panel.create_client(target, inbound.id, key).await
                    }
                    DriftAction::RemoveClient => {
                        panel.remove_client(target, inbound.id, key).await
                    }
                    DriftAction::Deactivate => {
                        panel.set_client_enabled(target, inbound.id, key, false).await
                    }
                    DriftAction::Activate => {
                        panel.set_client_enabled(target, inbound.id, key, true).await
                    }
                    DriftAction::Nothing => continue,
                };

                match result {
                    Ok(()) => info!(
                        sub_id = sub.subscription.id,
                        server_id = target.server_id,
                        inbound_id = inbound.id,
                        action = ?action,
                        "drift corrected"
                    ),
                    Err(err) => warn!(
                        sub_id = sub.subscription.id,
                        server_id = target.server_id,
                        inbound_id = inbound.id,
                        action = ?action,
                        error = %err,
                        "drift correction failed"
                    ),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(enable: bool) -> ClientStats {
        ClientStats {
            id: 1,
            inbound_id: 1,
            email: "c".to_string(),
            enable,
            expiry_time: 0,
            up: 0,
            down: 0,
            total: 0,
            all_time: 0,
            reset: 0,
            sub_id: "key".to_string(),
        }
    }

    #[test]
    fn missing_client_is_created_only_when_available() {
        assert_eq!(diagnose(true, false, None), DriftAction::CreateClient);
        assert_eq!(diagnose(false, false, None), DriftAction::Nothing);
        // A removed subscription that left no remote trace needs no work.
        assert_eq!(diagnose(false, true, None), DriftAction::Nothing);
    }

    #[test]
    fn removed_subscription_always_cleans_up() {
        let enabled = client(true);
        let disabled = client(false);
        assert_eq!(diagnose(false, true, Some(&enabled)), DriftAction::RemoveClient);
        assert_eq!(diagnose(false, true, Some(&disabled)), DriftAction::RemoveClient);
    }

    #[test]
    fn enable_flag_converges_to_availabled() {
        let enabled = client(true);
        let disabled = client(false);
        assert_eq!(diagnose(false, false, Some(&enabled)), DriftAction::Deactivate);
        assert_eq!(diagnose(true, false, Some(&disabled)), DriftAction::Activate);
        assert_eq!(diagnose(true, false, Some(&enabled)), DriftAction::Nothing);
        assert_eq!(diagnose(false, false, Some(&disabled)), DriftAction::Nothing);
    }
}
