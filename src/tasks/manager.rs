use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info};

use crate::state::AppState;

use super::{access, reconcile};

/// Drives the periodic jobs: panel session refresh and the reconciliation
/// pass. Each job runs on its own interval with the body awaited inline,
/// so two passes of the same job can never overlap; a failed pass is
/// logged and the next tick still fires.
pub struct TaskManager {
    state: AppState,
}

impl TaskManager {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().run_session_refresh()),
            tokio::spawn(self.run_reconcile()),
        ]
    }

    async fn run_session_refresh(self: Arc<Self>) {
        let config = self.state.config.get();
        info!(
            interval_secs = config.session_refresh_interval_secs,
            "starting panel session refresh task"
        );
        let mut ticker = time::interval(Duration::from_secs(config.session_refresh_interval_secs));

        loop {
            ticker.tick().await;
            let ttl = self.state.config.get().session_ttl_secs;
            if let Err(err) = access::refresh_panel_sessions(
                &self.state.db,
                self.state.panel.as_ref(),
                &self.state.cipher,
                ttl,
            )
            .await
            {
                error!(error = %err, "session refresh sweep failed");
            }
        }
    }

    async fn run_reconcile(self: Arc<Self>) {
        let config = self.state.config.get();
        info!(
            interval_secs = config.reconcile_interval_secs,
            "starting reconciliation task"
        );
        let mut ticker = time::interval(Duration::from_secs(config.reconcile_interval_secs));

        loop {
            ticker.tick().await;
            if let Err(err) = reconcile::reconcile_subscriptions(
                &self.state.db,
                self.state.panel.as_ref(),
                &self.state.cipher,
            )
            .await
            {
                error!(error = %err, "reconciliation pass failed");
            }
        }
    }
}
