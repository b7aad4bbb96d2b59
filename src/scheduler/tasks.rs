use std::sync::Arc;

use tracing::error;

use crate::bot::AppState;
use crate::scheduler::Scheduler;

/// Register the daily quiz as an in-process cron job. Used when no external
/// trigger source drives the ticks.
pub async fn register_quiz_job(
    scheduler: &Scheduler,
    state: Arc<AppState>,
    cron_expr: &str,
) -> anyhow::Result<()> {
    scheduler
        .add_cron_job(cron_expr, "daily-quiz", move || {
            let state = Arc::clone(&state);
            Box::pin(async move {
                if let Err(e) = state.run_tick().await {
                    error!("Scheduled quiz tick failed: {:#}", e);
                }
            })
        })
        .await?;

    Ok(())
}
