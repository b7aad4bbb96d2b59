//! Turns a pool of recent chat messages into a "who sent this?" quiz.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::QuizConfig;
use crate::platform::{HistoryMessage, SenderName};

/// Question posted with every quiz poll
pub const QUIZ_QUESTION: &str = "Who sent this message?";

/// Telegram polls accept at most 10 options, one of which is the answer
const MAX_DISTRACTORS: usize = 9;

/// Recent text messages of one chat, newest first
#[derive(Debug, Default)]
pub struct MessageCorpus {
    messages: Vec<HistoryMessage>,
}

impl MessageCorpus {
    pub fn new(messages: Vec<HistoryMessage>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[HistoryMessage] {
        &self.messages
    }
}

/// Limits on how many wrong answers a quiz offers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizPolicy {
    pub max_distractors: usize,
    /// Corpora with fewer distinct wrong answers than this produce no quiz
    pub min_distractors: usize,
}

impl Default for QuizPolicy {
    fn default() -> Self {
        Self {
            max_distractors: 4,
            min_distractors: 1,
        }
    }
}

impl From<&QuizConfig> for QuizPolicy {
    fn from(config: &QuizConfig) -> Self {
        Self {
            max_distractors: config.max_distractors.min(MAX_DISTRACTORS),
            min_distractors: config.min_distractors,
        }
    }
}

/// One quiz: the re-posted message and the poll built around it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizUnit {
    pub announcement_text: String,
    pub options: Vec<SenderName>,
    pub correct_index: usize,
}

impl QuizUnit {
    pub fn correct_answer(&self) -> &SenderName {
        &self.options[self.correct_index]
    }

    pub fn option_labels(&self) -> Vec<String> {
        self.options.iter().map(|o| o.as_str().to_string()).collect()
    }
}

/// Pick a random message from `corpus` and build a quiz around its sender.
///
/// Wrong answers are distinct sender names drawn without replacement; the
/// final option order is shuffled. Returns `None` when the corpus is empty or
/// offers fewer than `policy.min_distractors` wrong answers.
pub fn compose<R: Rng + ?Sized>(
    corpus: &MessageCorpus,
    policy: QuizPolicy,
    rng: &mut R,
) -> Option<QuizUnit> {
    let target = corpus.messages().choose(rng)?;
    let correct = &target.sender;

    // BTreeSet keeps the pool order stable so a seeded rng reproduces a quiz
    let pool: Vec<&SenderName> = corpus
        .messages()
        .iter()
        .map(|m| &m.sender)
        .filter(|name| *name != correct)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if pool.len() < policy.min_distractors {
        return None;
    }

    let mut options: Vec<SenderName> = pool
        .choose_multiple(rng, policy.max_distractors.min(pool.len()))
        .map(|name| (*name).clone())
        .collect();
    options.push(correct.clone());
    options.shuffle(rng);

    let correct_index = options.iter().position(|o| o == correct)?;

    Some(QuizUnit {
        announcement_text: target.text.clone(),
        options,
        correct_index,
    })
}
