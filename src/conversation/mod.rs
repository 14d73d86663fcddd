// src/conversation/mod.rs
//! Per-user post composition for the channel: a nine-field job listing, a
//! free-form vacancy structured by AI, or a six-field advertisement. Each goes
//! through an optional AI polish and an explicit confirmation before it is
//! published.
//!
//! Sessions live in a map keyed by user id. The map lock is never held across
//! an await: AI calls and publishing release it and re-check the session id
//! when the result arrives, so `/cancel` frees an AI-bound session immediately.

pub mod listing;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::generate::{Constraints, ContentGenerator, GeneratedContent};
use crate::publish::Publisher;

pub use listing::{Ad, AdField, Form, FormField, Listing, ListingField};

pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    /// Start a step-by-step job listing.
    Start,
    /// Start a vacancy sent as one free-form message.
    StartFreeform,
    StartAd,
    Text(String),
    Polish,
    Keep,
    Confirm,
    Reject,
    Cancel,
}

/// Externally visible state after handling an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConversationState {
    Idle,
    CollectingField(ListingField),
    CollectingAdField(AdField),
    AwaitingFreeform,
    ReviewOffer,
    Polishing,
    AwaitingConfirmation,
    Publishing,
    Published,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub state: ConversationState,
}

impl Reply {
    fn new(text: impl Into<String>, state: ConversationState) -> Self {
        Self {
            text: text.into(),
            state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    CollectingField(ListingField),
    CollectingAdField(AdField),
    AwaitingFreeform,
    ReviewOffer,
    Polishing,
    AwaitingConfirmation,
    Publishing,
}

impl Step {
    fn state(self) -> ConversationState {
        match self {
            Step::CollectingField(f) => ConversationState::CollectingField(f),
            Step::CollectingAdField(f) => ConversationState::CollectingAdField(f),
            Step::AwaitingFreeform => ConversationState::AwaitingFreeform,
            Step::ReviewOffer => ConversationState::ReviewOffer,
            Step::Polishing => ConversationState::Polishing,
            Step::AwaitingConfirmation => ConversationState::AwaitingConfirmation,
            Step::Publishing => ConversationState::Publishing,
        }
    }
}

#[derive(Debug, Clone)]
enum Body {
    Listing(Listing),
    Freeform,
    Ad(Ad),
}

impl Body {
    fn noun(&self) -> &'static str {
        match self {
            Body::Listing(_) => "listing",
            Body::Freeform => "vacancy",
            Body::Ad(_) => "advertisement",
        }
    }

    fn with_article(&self) -> &'static str {
        match self {
            Body::Listing(_) => "a listing",
            Body::Freeform => "a vacancy",
            Body::Ad(_) => "an advertisement",
        }
    }

    fn render(&self) -> String {
        match self {
            Body::Listing(l) => l.render(),
            Body::Ad(a) => a.render(),
            Body::Freeform => String::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Draft {
    text: String,
    /// Provider that produced the text; `None` for the user's own rendering.
    provider: Option<String>,
}

#[derive(Debug, Clone)]
struct Session {
    id: u64,
    body: Body,
    step: Step,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    draft: Option<Draft>,
}

#[derive(Debug, Clone)]
pub struct ConversationCfg {
    /// Idle time after which a session is purged.
    pub session_timeout: chrono::Duration,
    pub polish_enabled: bool,
    pub ad_polish_enabled: bool,
    pub max_chars: usize,
}

impl Default for ConversationCfg {
    fn default() -> Self {
        Self {
            session_timeout: chrono::Duration::minutes(30),
            polish_enabled: true,
            ad_polish_enabled: true,
            max_chars: 3500,
        }
    }
}

pub struct ListingConversation {
    sessions: Mutex<HashMap<UserId, Session>>,
    next_id: AtomicU64,
    generator: Arc<ContentGenerator>,
    publisher: Arc<Publisher>,
    cfg: ConversationCfg,
}

const REVIEW_HINT: &str = "Send /polish to let AI improve the text, or /keep to use it as is.";
const CONFIRM_HINT: &str = "Send /confirm to publish, /edit to go back, or /cancel.";
const FREEFORM_PROMPT: &str = "Send the whole vacancy in one message: position, company, location, \
salary, requirements, conditions, contact. Put the vacancy link right in the text if there is one.";

fn field_prompt<F: FormField>(f: F) -> String {
    format!("Step {}/{}. {}", f.number(), F::ALL.len(), f.question())
}

impl ListingConversation {
    pub fn new(
        generator: Arc<ContentGenerator>,
        publisher: Arc<Publisher>,
        cfg: ConversationCfg,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            generator,
            publisher,
            cfg,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<UserId, Session>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_expired(&self, s: &Session, now: DateTime<Utc>) -> bool {
        s.step != Step::Publishing && now - s.last_activity > self.cfg.session_timeout
    }

    fn polish_enabled(&self, body: &Body) -> bool {
        match body {
            Body::Listing(_) => self.cfg.polish_enabled,
            Body::Ad(_) => self.cfg.ad_polish_enabled,
            Body::Freeform => false,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions().len()
    }

    pub fn state_of(&self, user_id: UserId) -> ConversationState {
        self.sessions()
            .get(&user_id)
            .map(|s| s.step.state())
            .unwrap_or(ConversationState::Idle)
    }

    /// Purge sessions idle past the timeout. A session that is being
    /// published is kept. Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.sessions();
        let before = map.len();
        map.retain(|uid, s| {
            let keep = !self.is_expired(s, now);
            if !keep {
                tracing::info!(user_id = uid, step = ?s.step, "conversation session timed out");
            }
            keep
        });
        let removed = before - map.len();
        gauge!("conversation_active_sessions").set(map.len() as f64);
        removed
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                self.sweep(Utc::now());
            }
        })
    }

    pub async fn handle(&self, user_id: UserId, input: UserInput, now: DateTime<Utc>) -> Reply {
        let timed_out = {
            let mut map = self.sessions();
            match map.get(&user_id) {
                Some(s) if self.is_expired(s, now) => {
                    map.remove(&user_id);
                    tracing::info!(user_id, "conversation session timed out");
                    true
                }
                _ => false,
            }
        };

        let reply = match input {
            UserInput::Cancel => self.cancel(user_id),
            UserInput::Start => self.start(user_id, Body::Listing(Listing::new()), now, timed_out),
            UserInput::StartFreeform => self.start(user_id, Body::Freeform, now, timed_out),
            UserInput::StartAd => self.start(user_id, Body::Ad(Ad::new()), now, timed_out),
            UserInput::Text(t) => self.text(user_id, &t, now, timed_out).await,
            UserInput::Polish => self.polish(user_id, now).await,
            UserInput::Keep => self.keep(user_id, now),
            UserInput::Confirm => self.confirm(user_id, now).await,
            UserInput::Reject => self.reject(user_id, now),
        };
        gauge!("conversation_active_sessions").set(self.active_sessions() as f64);
        reply
    }

    fn idle_reply(timed_out: bool) -> Reply {
        let text = if timed_out {
            "Your session timed out. Send /post_listing, /post_vacancy_free or /post_ad to start again."
        } else {
            "Nothing in progress. Send /post_listing, /post_vacancy_free or /post_ad to start."
        };
        Reply::new(text, ConversationState::Idle)
    }

    fn cancel(&self, user_id: UserId) -> Reply {
        let mut map = self.sessions();
        let publishing = map.get(&user_id).map(|s| s.step == Step::Publishing);
        match publishing {
            Some(true) => Reply::new(
                "The post is being published and can no longer be cancelled.",
                ConversationState::Publishing,
            ),
            Some(false) => {
                let noun = map.remove(&user_id).map_or("post", |s| {
                    tracing::info!(user_id, step = ?s.step, kind = s.body.noun(), "composition cancelled");
                    s.body.noun()
                });
                Reply::new(format!("The {noun} was cancelled."), ConversationState::Cancelled)
            }
            None => Reply::new("Nothing to cancel.", ConversationState::Idle),
        }
    }

    fn start(&self, user_id: UserId, body: Body, now: DateTime<Utc>, timed_out: bool) -> Reply {
        let mut map = self.sessions();
        if let Some(s) = map.get_mut(&user_id) {
            s.last_activity = now;
            let text = format!(
                "You already have {} in progress.\n\n{}",
                s.body.with_article(),
                self.step_prompt(s)
            );
            return Reply::new(text, s.step.state());
        }

        let (step, intro, first_prompt) = match &body {
            Body::Listing(_) => (
                Step::CollectingField(ListingField::first()),
                "New job listing.",
                field_prompt(ListingField::first()),
            ),
            Body::Ad(_) => (
                Step::CollectingAdField(AdField::first()),
                "New advertisement.",
                field_prompt(AdField::first()),
            ),
            Body::Freeform => (Step::AwaitingFreeform, "Free-form vacancy.", FREEFORM_PROMPT.to_string()),
        };
        tracing::info!(user_id, kind = body.noun(), "composition started");
        map.insert(
            user_id,
            Session {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                body,
                step,
                created_at: now,
                last_activity: now,
                draft: None,
            },
        );
        let mut text = String::new();
        if timed_out {
            text.push_str("Your previous session timed out.\n\n");
        }
        text.push_str(intro);
        text.push_str(" Send /cancel at any time to stop.\n\n");
        text.push_str(&first_prompt);
        Reply::new(text, step.state())
    }

    fn step_prompt(&self, s: &Session) -> String {
        match s.step {
            Step::CollectingField(f) => field_prompt(f),
            Step::CollectingAdField(f) => field_prompt(f),
            Step::AwaitingFreeform => FREEFORM_PROMPT.to_string(),
            Step::ReviewOffer => format!("Preview:\n\n{}\n\n{}", s.body.render(), REVIEW_HINT),
            Step::Polishing => "AI is working on your text, please wait.".to_string(),
            Step::AwaitingConfirmation => {
                let text = s
                    .draft
                    .as_ref()
                    .map(|d| d.text.clone())
                    .unwrap_or_else(|| s.body.render());
                format!("Preview:\n\n{text}\n\n{CONFIRM_HINT}")
            }
            Step::Publishing => "Your post is being published, please wait.".to_string(),
        }
    }

    /// Step after the last form field: the polish offer, or straight to
    /// confirmation with the user's own rendering.
    fn after_last_field(&self, s: &mut Session) -> Reply {
        if self.polish_enabled(&s.body) {
            s.step = Step::ReviewOffer;
        } else {
            s.draft = Some(Draft {
                text: s.body.render(),
                provider: None,
            });
            s.step = Step::AwaitingConfirmation;
        }
        Reply::new(self.step_prompt(s), s.step.state())
    }

    async fn text(&self, user_id: UserId, input: &str, now: DateTime<Utc>, timed_out: bool) -> Reply {
        let value = input.trim();
        let session_id = {
            let mut map = self.sessions();
            let Some(s) = map.get_mut(&user_id) else {
                return Self::idle_reply(timed_out);
            };
            s.last_activity = now;

            let collecting = matches!(
                s.step,
                Step::CollectingField(_) | Step::CollectingAdField(_) | Step::AwaitingFreeform
            );
            if !collecting {
                let prompt = self.step_prompt(s);
                return Reply::new(prompt, s.step.state());
            }
            if value.is_empty() {
                return Reply::new(
                    format!("This field cannot be empty.\n\n{}", self.step_prompt(s)),
                    s.step.state(),
                );
            }

            let next = match (s.step, &mut s.body) {
                (Step::CollectingField(field), Body::Listing(listing)) => {
                    listing.set(field, value);
                    field.next().map(Step::CollectingField)
                }
                (Step::CollectingAdField(field), Body::Ad(ad)) => {
                    ad.set(field, value);
                    field.next().map(Step::CollectingAdField)
                }
                _ => {
                    // Free-form text goes to the AI below, without the lock.
                    s.step = Step::Polishing;
                    Some(Step::Polishing)
                }
            };
            match next {
                Some(Step::Polishing) => s.id,
                Some(step) => {
                    s.step = step;
                    return Reply::new(self.step_prompt(s), s.step.state());
                }
                None => return self.after_last_field(s),
            }
        };

        let content = self
            .generator
            .normalize_freeform(user_id, value, Constraints::new(self.cfg.max_chars))
            .await;
        self.accept_ai_draft(
            user_id,
            session_id,
            content,
            "AI is unavailable right now; your text is used as sent.\n\n",
        )
    }

    async fn polish(&self, user_id: UserId, now: DateTime<Utc>) -> Reply {
        let (session_id, raw, is_ad) = {
            let mut map = self.sessions();
            let Some(s) = map.get_mut(&user_id) else {
                return Self::idle_reply(false);
            };
            s.last_activity = now;
            if s.step != Step::ReviewOffer || !self.polish_enabled(&s.body) {
                let prompt = self.step_prompt(s);
                return Reply::new(prompt, s.step.state());
            }
            s.step = Step::Polishing;
            (s.id, s.body.render(), matches!(s.body, Body::Ad(_)))
        };

        let constraints = Constraints::new(self.cfg.max_chars);
        let content = if is_ad {
            self.generator.polish_ad(user_id, &raw, constraints).await
        } else {
            self.generator.polish_listing(user_id, &raw, constraints).await
        };
        self.accept_ai_draft(
            user_id,
            session_id,
            content,
            "AI polish is unavailable right now; your original text is kept.\n\n",
        )
    }

    /// Store an AI result as the draft, unless the session was cancelled or
    /// replaced while the call was in flight.
    fn accept_ai_draft(
        &self,
        user_id: UserId,
        session_id: u64,
        content: GeneratedContent,
        fallback_note: &str,
    ) -> Reply {
        let mut map = self.sessions();
        match map.get_mut(&user_id) {
            Some(s) if s.id == session_id && s.step == Step::Polishing => {
                let from_ai = !content.is_fallback();
                s.draft = Some(Draft {
                    text: content.text,
                    provider: from_ai.then_some(content.provider_used),
                });
                s.step = Step::AwaitingConfirmation;
                let mut text = String::new();
                if !from_ai {
                    text.push_str(fallback_note);
                }
                text.push_str(&self.step_prompt(s));
                Reply::new(text, s.step.state())
            }
            _ => {
                tracing::debug!(user_id, "AI result discarded, session gone");
                Reply::new("This post is no longer active.", ConversationState::Idle)
            }
        }
    }

    fn keep(&self, user_id: UserId, now: DateTime<Utc>) -> Reply {
        let mut map = self.sessions();
        let Some(s) = map.get_mut(&user_id) else {
            return Self::idle_reply(false);
        };
        s.last_activity = now;
        if s.step == Step::ReviewOffer {
            s.draft = Some(Draft {
                text: s.body.render(),
                provider: None,
            });
            s.step = Step::AwaitingConfirmation;
        }
        Reply::new(self.step_prompt(s), s.step.state())
    }

    fn reject(&self, user_id: UserId, now: DateTime<Utc>) -> Reply {
        let mut map = self.sessions();
        let Some(s) = map.get_mut(&user_id) else {
            return Self::idle_reply(false);
        };
        s.last_activity = now;
        if s.step == Step::AwaitingConfirmation {
            s.draft = None;
            s.step = match &s.body {
                Body::Freeform => Step::AwaitingFreeform,
                body if self.polish_enabled(body) => Step::ReviewOffer,
                // Nothing to review without polish: collect the last field again.
                Body::Listing(_) => Step::CollectingField(ListingField::Contact),
                Body::Ad(_) => Step::CollectingAdField(AdField::Contact),
            };
        }
        Reply::new(self.step_prompt(s), s.step.state())
    }

    async fn confirm(&self, user_id: UserId, now: DateTime<Utc>) -> Reply {
        // The session stays in the map as `Publishing` until the send settles.
        let (session_id, draft, noun, created_at) = {
            let mut map = self.sessions();
            let Some(s) = map.get_mut(&user_id) else {
                return Self::idle_reply(false);
            };
            let draft = match (&s.step, &s.draft) {
                (Step::AwaitingConfirmation, Some(d)) => d.clone(),
                _ => {
                    let prompt = self.step_prompt(s);
                    return Reply::new(prompt, s.step.state());
                }
            };
            s.step = Step::Publishing;
            s.last_activity = now;
            (s.id, draft, s.body.noun(), s.created_at)
        };

        let result = self.publisher.publish_text(&draft.text).await;

        let mut map = self.sessions();
        let ours = matches!(map.get(&user_id), Some(s) if s.id == session_id);
        match result {
            Ok(ack) => {
                if ours {
                    map.remove(&user_id);
                }
                tracing::info!(
                    user_id,
                    kind = noun,
                    provider = draft.provider.as_deref().unwrap_or("none"),
                    message_id = ack.message_id,
                    took_secs = (now - created_at).num_seconds(),
                    "user post published"
                );
                Reply::new(format!("The {noun} was published. Thank you!"), ConversationState::Published)
            }
            Err(e) => {
                tracing::warn!(user_id, kind = noun, error = %e, "user post publish failed");
                match map.get_mut(&user_id) {
                    Some(s) if ours => {
                        s.step = Step::AwaitingConfirmation;
                        Reply::new(
                            format!("Publishing failed: {e}\n\nSend /confirm to retry or /cancel."),
                            ConversationState::AwaitingConfirmation,
                        )
                    }
                    _ => Reply::new(format!("Publishing failed: {e}"), ConversationState::Idle),
                }
            }
        }
    }
}
