use futures::future::join_all;
use tracing::{info, warn};

use super::request::PanelClient;
use super::types::{ClientStats, Inbound, PanelTarget};

/// Per-inbound action a fleet operation applies to the subscription's
/// remote client.
#[derive(Clone, Copy, Debug)]
enum ClientOp<'a> {
    Create,
    SetEnabled(bool),
    Remove,
    Replace { new_key: &'a str, enabled: bool },
}

impl ClientOp<'_> {
    fn name(&self) -> &'static str {
        match self {
            ClientOp::Create => "create",
            ClientOp::SetEnabled(true) => "activate",
            ClientOp::SetEnabled(false) => "deactivate",
            ClientOp::Remove => "remove",
            ClientOp::Replace { .. } => "revoke",
        }
    }
}

/// A (server, inbound) pair is skipped when the remote side already agrees
/// with the operation's outcome, so the pair never enters the plan.
fn should_skip(op: ClientOp<'_>, key: &str, existing: Option<&ClientStats>) -> bool {
    match op {
        ClientOp::Create => existing.is_some(),
        ClientOp::SetEnabled(enabled) => existing.is_some_and(|c| c.enable == enabled),
        ClientOp::Remove => existing.is_none(),
        ClientOp::Replace { new_key, .. } => existing.is_none() || new_key == key,
    }
}

/// Fleet-wide driver shared by the five public operations: list inbounds on
/// every target concurrently (a failed or empty listing drops that server
/// from the plan), plan one mutation per non-skipped (server, inbound)
/// pair, dispatch the plan concurrently and fold the outcomes into one
/// bool. An empty plan is vacuously successful; partial failures stay
/// applied and are re-driven by the next reconciliation pass.
async fn run_fleet_op(
    panel: &dyn PanelClient,
    targets: &[PanelTarget],
    key: &str,
    op: ClientOp<'_>,
) -> bool {
    let listings = join_all(targets.iter().map(|target| async move {
        match panel.inbounds(target).await {
            Ok(inbounds) if !inbounds.is_empty() => Some((target, inbounds)),
            Ok(_) => {
                warn!(
                    server_id = target.server_id,
                    op = op.name(),
                    "server returned no inbounds; skipping"
                );
                None
            }
            Err(err) => {
                warn!(
                    server_id = target.server_id,
                    op = op.name(),
                    error = %err,
                    "failed to list inbounds; skipping server"
                );
                None
            }
        }
    }))
    .await;

    let mut plan: Vec<(&PanelTarget, &Inbound)> = Vec::new();
    for (target, inbounds) in listings.iter().flatten() {
        for inbound in inbounds {
            if !should_skip(op, key, inbound.find_client(key)) {
                plan.push((*target, inbound));
            }
        }
    }

    if plan.is_empty() {
        return true;
    }

    let planned = plan.len();
    let outcomes = join_all(plan.into_iter().map(|(target, inbound)| async move {
        let result = match op {
            ClientOp::Create => panel.create_client(target, inbound.id, key).await,
            ClientOp::SetEnabled(enabled) => {
                panel
                    .set_client_enabled(target, inbound.id, key, enabled)
                    .await
            }
            ClientOp::Remove => panel.remove_client(target, inbound.id, key).await,
            ClientOp::Replace { new_key, enabled } => {
                panel
                    .replace_client(target, inbound.id, key, new_key, enabled)
                    .await
            }
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    server_id = target.server_id,
                    inbound_id = inbound.id,
                    op = op.name(),
                    error = %err,
                    "fleet mutation failed"
                );
                false
            }
        }
    }))
    .await;

    let succeeded = outcomes.iter().filter(|ok| **ok).count();
    info!(
        op = op.name(),
        planned,
        succeeded,
        "fleet operation finished"
    );
    succeeded == planned
}

/// Ensure a client with this identity exists in every inbound of every
/// target.
pub async fn create(panel: &dyn PanelClient, targets: &[PanelTarget], key: &str) -> bool {
    run_fleet_op(panel, targets, key, ClientOp::Create).await
}

pub async fn activate(panel: &dyn PanelClient, targets: &[PanelTarget], key: &str) -> bool {
    run_fleet_op(panel, targets, key, ClientOp::SetEnabled(true)).await
}

pub async fn deactivate(panel: &dyn PanelClient, targets: &[PanelTarget], key: &str) -> bool {
    run_fleet_op(panel, targets, key, ClientOp::SetEnabled(false)).await
}

pub async fn remove(panel: &dyn PanelClient, targets: &[PanelTarget], key: &str) -> bool {
    run_fleet_op(panel, targets, key, ClientOp::Remove).await
}

/// Rewrite the identity token of every existing remote client, preserving
/// the requested enabled state.
pub async fn revoke(
    panel: &dyn PanelClient,
    targets: &[PanelTarget],
    old_key: &str,
    new_key: &str,
    enabled: bool,
) -> bool {
    run_fleet_op(
        panel,
        targets,
        old_key,
        ClientOp::Replace { new_key, enabled },
    )
    .await
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::panel::request::PanelError;

    const KEY: &str = "7f9c61a2-0f6b-4e0d-9a42-1f2e3d4c5b6a";

    fn target(server_id: i32) -> PanelTarget {
        PanelTarget {
            server_id,
            remark: format!("panel-{server_id}"),
            host: format!("https://panel-{server_id}.example"),
            session: "3x-ui=abc".to_string(),
            sub_host: None,
        }
    }

    fn client(sub_id: &str, enable: bool) -> ClientStats {
        ClientStats {
            id: 1,
            inbound_id: 0,
            email: sub_id.to_string(),
            enable,
            expiry_time: 0,
            up: 0,
            down: 0,
            total: 0,
            all_time: 0,
            reset: 0,
            sub_id: sub_id.to_string(),
        }
    }

    fn inbound(id: i64, clients: Vec<ClientStats>) -> Inbound {
        Inbound {
            id,
            remark: format!("inbound-{id}"),
            enable: true,
            protocol: "vless".to_string(),
            client_stats: clients,
        }
    }

    #[derive(Default)]
    struct FakePanel {
        inbounds: HashMap<i32, Vec<Inbound>>,
        fail_listing: HashSet<i32>,
        fail_mutations: HashSet<(i32, i64)>,
        calls: Mutex<Vec<(&'static str, i32, i64)>>,
    }

    impl FakePanel {
        fn record(&self, method: &'static str, target: &PanelTarget, inbound_id: i64) {
            self.calls
                .lock()
                .unwrap()
                .push((method, target.server_id, inbound_id));
        }

        fn mutation(
            &self,
            method: &'static str,
            target: &PanelTarget,
            inbound_id: i64,
        ) -> Result<(), PanelError> {
            self.record(method, target, inbound_id);
            if self.fail_mutations.contains(&(target.server_id, inbound_id)) {
                Err(PanelError::Rejected("injected failure".to_string()))
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> Vec<(&'static str, i32, i64)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PanelClient for FakePanel {
        async fn login(&self, _: &str, _: &str, _: &str) -> Result<String, PanelError> {
            Err(PanelError::Rejected("not supported in fake".to_string()))
        }

        async fn inbounds(&self, target: &PanelTarget) -> Result<Vec<Inbound>, PanelError> {
            if self.fail_listing.contains(&target.server_id) {
                return Err(PanelError::Rejected("listing down".to_string()));
            }
            Ok(self
                .inbounds
                .get(&target.server_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn create_client(
            &self,
            target: &PanelTarget,
            inbound_id: i64,
            _key: &str,
        ) -> Result<(), PanelError> {
            self.mutation("create", target, inbound_id)
        }

        async fn set_client_enabled(
            &self,
            target: &PanelTarget,
            inbound_id: i64,
            _key: &str,
            enabled: bool,
        ) -> Result<(), PanelError> {
            self.mutation(if enabled { "activate" } else { "deactivate" }, target, inbound_id)
        }

        async fn replace_client(
            &self,
            target: &PanelTarget,
            inbound_id: i64,
            _old_key: &str,
            _new_key: &str,
            _enabled: bool,
        ) -> Result<(), PanelError> {
            self.mutation("replace", target, inbound_id)
        }

        async fn remove_client(
            &self,
            target: &PanelTarget,
            inbound_id: i64,
            _key: &str,
        ) -> Result<(), PanelError> {
            self.mutation("remove", target, inbound_id)
        }

        async fn fetch_links(&self, _url: &str) -> Result<Vec<String>, PanelError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn skip_rules_match_operation_semantics() {
        let present_enabled = client(KEY, true);
        let present_disabled = client(KEY, false);

        assert!(should_skip(ClientOp::Create, KEY, Some(&present_enabled)));
        assert!(!should_skip(ClientOp::Create, KEY, None));

        assert!(should_skip(ClientOp::SetEnabled(true), KEY, Some(&present_enabled)));
        assert!(!should_skip(ClientOp::SetEnabled(true), KEY, Some(&present_disabled)));
        assert!(!should_skip(ClientOp::SetEnabled(true), KEY, None));

        assert!(should_skip(ClientOp::SetEnabled(false), KEY, Some(&present_disabled)));
        assert!(!should_skip(ClientOp::SetEnabled(false), KEY, Some(&present_enabled)));

        assert!(should_skip(ClientOp::Remove, KEY, None));
        assert!(!should_skip(ClientOp::Remove, KEY, Some(&present_enabled)));

        let replace = ClientOp::Replace {
            new_key: "new-key",
            enabled: true,
        };
        assert!(should_skip(replace, KEY, None));
        assert!(!should_skip(replace, KEY, Some(&present_enabled)));
        let same = ClientOp::Replace {
            new_key: KEY,
            enabled: true,
        };
        assert!(should_skip(same, KEY, Some(&present_enabled)));
    }

    #[tokio::test]
    async fn create_plans_only_inbounds_missing_the_client() {
        let mut panel = FakePanel::default();
        panel
            .inbounds
            .insert(1, vec![inbound(10, vec![client(KEY, true)])]);
        panel.inbounds.insert(2, vec![inbound(20, vec![])]);
        let targets = vec![target(1), target(2)];

        assert!(create(&panel, &targets, KEY).await);
        assert_eq!(panel.calls(), vec![("create", 2, 20)]);
    }

    #[tokio::test]
    async fn create_reflects_single_planned_failure() {
        let mut panel = FakePanel::default();
        panel
            .inbounds
            .insert(1, vec![inbound(10, vec![client(KEY, true)])]);
        panel.inbounds.insert(2, vec![inbound(20, vec![])]);
        panel.fail_mutations.insert((2, 20));
        let targets = vec![target(1), target(2)];

        assert!(!create(&panel, &targets, KEY).await);
    }

    #[tokio::test]
    async fn zero_plan_is_vacuously_successful() {
        let mut panel = FakePanel::default();
        panel
            .inbounds
            .insert(1, vec![inbound(10, vec![client(KEY, true)])]);
        let targets = vec![target(1)];

        assert!(create(&panel, &targets, KEY).await);
        assert!(panel.calls().is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_is_dropped_from_the_plan() {
        let mut panel = FakePanel::default();
        panel.fail_listing.insert(1);
        panel.inbounds.insert(2, vec![inbound(20, vec![])]);
        let targets = vec![target(1), target(2)];

        assert!(create(&panel, &targets, KEY).await);
        assert_eq!(panel.calls(), vec![("create", 2, 20)]);
    }

    #[tokio::test]
    async fn deactivate_touches_only_enabled_clients() {
        let mut panel = FakePanel::default();
        panel.inbounds.insert(
            1,
            vec![
                inbound(10, vec![client(KEY, true)]),
                inbound(11, vec![client(KEY, false)]),
            ],
        );
        let targets = vec![target(1)];

        assert!(deactivate(&panel, &targets, KEY).await);
        assert_eq!(panel.calls(), vec![("deactivate", 1, 10)]);
    }

    #[tokio::test]
    async fn remove_skips_inbounds_without_the_client() {
        let mut panel = FakePanel::default();
        panel.inbounds.insert(
            1,
            vec![inbound(10, vec![client(KEY, true)]), inbound(11, vec![])],
        );
        let targets = vec![target(1)];

        assert!(remove(&panel, &targets, KEY).await);
        assert_eq!(panel.calls(), vec![("remove", 1, 10)]);
    }

    #[tokio::test]
    async fn revoke_with_identical_tokens_is_a_noop() {
        let mut panel = FakePanel::default();
        panel
            .inbounds
            .insert(1, vec![inbound(10, vec![client(KEY, true)])]);
        let targets = vec![target(1)];

        assert!(revoke(&panel, &targets, KEY, KEY, true).await);
        assert!(panel.calls().is_empty());
    }

    #[tokio::test]
    async fn revoke_rewrites_existing_clients() {
        let mut panel = FakePanel::default();
        panel.inbounds.insert(
            1,
            vec![inbound(10, vec![client(KEY, false)]), inbound(11, vec![])],
        );
        let targets = vec![target(1)];

        assert!(revoke(&panel, &targets, KEY, "other-key", false).await);
        assert_eq!(panel.calls(), vec![("replace", 1, 10)]);
    }
}
