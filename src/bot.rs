use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use teloxide::types::Update;
use tokio::sync::Mutex;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::guard::{AllowList, AuthorizationGuard, GuardDecision};
use crate::platform::telegram;
use crate::platform::{ChatGateway, HistorySource};
use crate::quiz::QuizPolicy;
use crate::scheduler::cycle::{self, CycleReport, CycleSettings};

/// Shared application state
pub struct AppState {
    allow_list: Arc<AllowList>,
    guard: AuthorizationGuard,
    gateway: Arc<dyn ChatGateway>,
    history: Arc<dyn HistorySource>,
    settings: CycleSettings,
    /// Held for the whole of each invocation so ticks and updates never interleave
    invocation: Mutex<()>,
}

impl AppState {
    pub fn new(
        config: &Config,
        gateway: Arc<dyn ChatGateway>,
        history: Arc<dyn HistorySource>,
    ) -> Self {
        let allow_list = Arc::new(config.telegram.authorized_chat_ids.clone());
        Self {
            guard: AuthorizationGuard::new(Arc::clone(&allow_list)),
            allow_list,
            gateway,
            history,
            settings: CycleSettings {
                fetch_limit: config.history.fetch_limit,
                policy: QuizPolicy::from(&config.quiz),
            },
            invocation: Mutex::new(()),
        }
    }

    /// Run one scheduled tick: a quiz for every allowed chat
    pub async fn run_tick(&self) -> Result<CycleReport> {
        let span = tracing::info_span!("tick", invocation = %Uuid::new_v4());
        async {
            let _running = self.invocation.lock().await;
            info!("Starting quiz cycle for {} chats", self.allow_list.len());

            let mut rng = StdRng::from_entropy();
            cycle::run_daily_cycle(
                &self.allow_list,
                self.history.as_ref(),
                self.gateway.as_ref(),
                self.settings,
                &mut rng,
            )
            .await
        }
        .instrument(span)
        .await
    }

    /// Handle one inbound update. Only the authorization guard reacts to
    /// updates; anything it does not care about is ignored.
    pub async fn process_update(&self, update: &Update) -> Option<GuardDecision> {
        let span = tracing::info_span!("update", invocation = %Uuid::new_v4(), update_id = update.id.0);
        async {
            let _running = self.invocation.lock().await;
            let Some(event) = telegram::guard_event(update) else {
                debug!("Ignoring update {} of an unhandled kind", update.id.0);
                return None;
            };
            Some(self.guard.enforce(&event, self.gateway.as_ref()).await)
        }
        .instrument(span)
        .await
    }
}
