use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::guard::AllowList;
use crate::platform::{ChatGateway, ChatId, HistorySession, HistorySource, PlatformError};
use crate::quiz::{self, MessageCorpus, QuizPolicy, QUIZ_QUESTION};

/// Why one chat's quiz was abandoned for this tick
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fetching history failed: {0}")]
    Fetch(#[source] PlatformError),
    #[error("sending quiz failed: {0}")]
    Dispatch(#[source] PlatformError),
}

/// Per-tick settings for the quiz cycle
#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    pub fetch_limit: usize,
    pub policy: QuizPolicy,
}

#[derive(Debug)]
enum ChatOutcome {
    Dispatched,
    NoQuiz,
}

/// What happened during one tick, for the operator log
#[derive(Debug)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub dispatched: Vec<ChatId>,
    /// Chats whose history could not make a quiz
    pub skipped: Vec<ChatId>,
    pub failed: Vec<(ChatId, String)>,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            dispatched: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Post one quiz to every allowed chat, one chat at a time.
///
/// A failure in one chat is logged and the cycle moves on. The history
/// session is opened once and closed before returning, whatever happened
/// to the individual chats.
pub async fn run_daily_cycle<R: Rng + Send>(
    allow_list: &AllowList,
    history: &dyn HistorySource,
    gateway: &dyn ChatGateway,
    settings: CycleSettings,
    rng: &mut R,
) -> Result<CycleReport> {
    let bot_id = gateway
        .bot_user_id()
        .await
        .context("Failed to resolve bot user id")?;

    let mut session = history
        .open()
        .await
        .context("Failed to open history session")?;

    let mut report = CycleReport::new();
    for chat_id in allow_list.iter() {
        match run_chat(chat_id, bot_id, session.as_mut(), gateway, settings, rng).await {
            Ok(ChatOutcome::Dispatched) => report.dispatched.push(chat_id),
            Ok(ChatOutcome::NoQuiz) => report.skipped.push(chat_id),
            Err(e) => {
                error!("Quiz for chat {} abandoned: {}", chat_id, e);
                report.failed.push((chat_id, e.to_string()));
            }
        }
    }

    if let Err(e) = session.close().await {
        warn!("Failed to close history session: {}", e);
    }

    info!(
        "Quiz cycle started at {} finished: {} sent, {} skipped, {} failed",
        report.started_at.to_rfc3339(),
        report.dispatched.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(report)
}

async fn run_chat<R: Rng + Send>(
    chat_id: ChatId,
    bot_id: i64,
    session: &mut dyn HistorySession,
    gateway: &dyn ChatGateway,
    settings: CycleSettings,
    rng: &mut R,
) -> Result<ChatOutcome, CycleError> {
    let corpus = MessageCorpus::new(
        session
            .fetch(chat_id, bot_id, settings.fetch_limit)
            .await
            .map_err(CycleError::Fetch)?,
    );

    if corpus.is_empty() {
        info!("No usable messages in chat {}", chat_id);
        return Ok(ChatOutcome::NoQuiz);
    }

    let quiz = quiz::compose(&corpus, settings.policy, rng);
    let corpus_len = corpus.len();
    drop(corpus);

    let Some(quiz) = quiz else {
        info!(
            "No quiz for chat {}: {} messages but too few distinct senders",
            chat_id, corpus_len
        );
        return Ok(ChatOutcome::NoQuiz);
    };

    gateway
        .send_text(chat_id, &quiz.announcement_text)
        .await
        .map_err(CycleError::Dispatch)?;
    gateway
        .send_quiz_poll(
            chat_id,
            QUIZ_QUESTION,
            &quiz.option_labels(),
            quiz.correct_index,
            false,
        )
        .await
        .map_err(CycleError::Dispatch)?;

    info!(
        "Sent quiz to chat {}: correct answer = {}",
        chat_id,
        quiz.correct_answer()
    );
    Ok(ChatOutcome::Dispatched)
}
