// src/bot.rs
//! Operator front-end: command parsing and a transport-agnostic handler that
//! turns one incoming message into one reply string, a per-user dispatcher
//! that keeps each user's messages in order, and the Telegram long-polling
//! loop that feeds it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::mpsc;

use crate::conversation::{ListingConversation, UserId, UserInput};
use crate::schedule::DigestScheduler;
use crate::telegram::TelegramClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    PostListing,
    PostVacancyFree,
    PostAd,
    Status,
    PostNow,
    Polish,
    Keep,
    Confirm,
    Edit,
    Cancel,
    Unknown(String),
    Text(String),
}

/// `/cmd@botname args` is accepted; command names are case-insensitive.
pub fn parse_command(text: &str) -> Command {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Command::Text(text.to_string());
    };
    let word = rest.split_whitespace().next().unwrap_or("");
    let name = word.split('@').next().unwrap_or("").to_ascii_lowercase();
    match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "post_listing" | "post_vacancy" => Command::PostListing,
        "post_vacancy_free" => Command::PostVacancyFree,
        "post_ad" => Command::PostAd,
        "status" => Command::Status,
        "post_now" => Command::PostNow,
        "polish" => Command::Polish,
        "keep" => Command::Keep,
        "confirm" => Command::Confirm,
        "edit" => Command::Edit,
        "cancel" => Command::Cancel,
        _ => Command::Unknown(name),
    }
}

const HELP: &str = "Commands:\n\
/post_listing - compose a job listing step by step\n\
/post_vacancy_free - send a vacancy as free text, AI structures it\n\
/post_ad - compose an advertisement post\n\
/status - ingestion and publication status\n\
/post_now - publish queued news now (admins)\n\
/cancel - cancel the current post\n\
/help - this message";

pub struct BotHandler {
    conversation: Arc<ListingConversation>,
    scheduler: Arc<DigestScheduler>,
    admin_ids: Vec<i64>,
    tz_offset: FixedOffset,
}

impl BotHandler {
    pub fn new(
        conversation: Arc<ListingConversation>,
        scheduler: Arc<DigestScheduler>,
        admin_ids: Vec<i64>,
        tz_offset: FixedOffset,
    ) -> Self {
        Self {
            conversation,
            scheduler,
            admin_ids,
            tz_offset,
        }
    }

    fn fmt_local(&self, ts: DateTime<Utc>) -> String {
        ts.with_timezone(&self.tz_offset)
            .format("%Y-%m-%d %H:%M %:z")
            .to_string()
    }

    pub fn status_text(&self, now: DateTime<Utc>) -> String {
        let st = self.scheduler.status(now);
        let last_ingest = st
            .last_ingest_at
            .map(|t| self.fmt_local(t))
            .unwrap_or_else(|| "never".to_string());
        format!(
            "Last ingestion: {}\nPending articles: {}\nPublished today: {}/{}\nNext publication: {}",
            last_ingest,
            st.pending,
            st.published_today,
            st.daily_cap,
            self.fmt_local(st.next_publish_at)
        )
    }

    pub async fn handle(&self, user_id: UserId, text: &str, now: DateTime<Utc>) -> String {
        let input = match parse_command(text) {
            Command::Start => {
                return format!("Hello! This bot publishes a daily tech news digest.\n\n{HELP}")
            }
            Command::Help => return HELP.to_string(),
            Command::Status => return self.status_text(now),
            Command::PostNow => {
                if !self.admin_ids.contains(&user_id) {
                    tracing::warn!(user_id, "post_now refused for non-admin");
                    return "This command is for administrators only.".to_string();
                }
                let r = self.scheduler.publish_now().await;
                return if r.cap_reached {
                    format!("Daily limit reached. {} articles stay queued.", r.pending)
                } else {
                    format!(
                        "Published {}, failed {}, still queued {}.",
                        r.published, r.failed, r.pending
                    )
                };
            }
            Command::Unknown(name) => {
                return format!("Unknown command /{name}.\n\n{HELP}");
            }
            Command::PostListing => UserInput::Start,
            Command::PostVacancyFree => UserInput::StartFreeform,
            Command::PostAd => UserInput::StartAd,
            Command::Polish => UserInput::Polish,
            Command::Keep => UserInput::Keep,
            Command::Confirm => UserInput::Confirm,
            Command::Edit => UserInput::Reject,
            Command::Cancel => UserInput::Cancel,
            Command::Text(t) => UserInput::Text(t),
        };
        self.conversation.handle(user_id, input, now).await.text
    }
}

/// Where dispatched replies go.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, chat_id: i64, text: &str);
}

#[async_trait]
impl ReplySink for TelegramClient {
    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.send_reply(chat_id, text).await {
            tracing::warn!(chat_id, error = %e, "reply failed");
        }
    }
}

struct Incoming {
    chat_id: i64,
    text: String,
}

/// One worker per active user: messages of a user are handled strictly in
/// arrival order, different users run concurrently. A worker exits after
/// `idle` without messages.
pub struct Dispatcher {
    handler: Arc<BotHandler>,
    sink: Arc<dyn ReplySink>,
    queues: Mutex<HashMap<UserId, mpsc::UnboundedSender<Incoming>>>,
    idle: Duration,
}

impl Dispatcher {
    pub fn new(handler: Arc<BotHandler>, sink: Arc<dyn ReplySink>, idle: Duration) -> Arc<Self> {
        Arc::new(Self {
            handler,
            sink,
            queues: Mutex::new(HashMap::new()),
            idle,
        })
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<UserId, mpsc::UnboundedSender<Incoming>>> {
        self.queues.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn active_workers(&self) -> usize {
        self.queues().len()
    }

    pub fn dispatch(self: &Arc<Self>, user_id: UserId, chat_id: i64, text: String) {
        let mut queues = self.queues();
        let msg = Incoming { chat_id, text };
        let msg = match queues.get(&user_id) {
            Some(tx) => match tx.send(msg) {
                Ok(()) => return,
                // Worker already gone; start a new one with this message.
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(msg).is_err() {
            return;
        }
        queues.insert(user_id, tx);
        drop(queues);
        tokio::spawn(Arc::clone(self).run_worker(user_id, rx));
    }

    async fn run_worker(self: Arc<Self>, user_id: UserId, mut rx: mpsc::UnboundedReceiver<Incoming>) {
        loop {
            let msg = match tokio::time::timeout(self.idle, rx.recv()).await {
                Ok(Some(m)) => m,
                Ok(None) => return,
                Err(_) => {
                    // Leave only with an empty queue; `dispatch` sends under
                    // the same lock, so nothing can slip in between.
                    let mut queues = self.queues();
                    match rx.try_recv() {
                        Ok(m) => m,
                        Err(_) => {
                            queues.remove(&user_id);
                            return;
                        }
                    }
                }
            };
            let reply = self.handler.handle(user_id, &msg.text, Utc::now()).await;
            self.sink.reply(msg.chat_id, &reply).await;
        }
    }
}

/// Long-poll `getUpdates` and answer private messages through a per-user
/// dispatcher, so a slow AI call never stalls other users.
pub async fn run_polling(client: TelegramClient, handler: Arc<BotHandler>) {
    let dispatcher = Dispatcher::new(handler, Arc::new(client.clone()), Duration::from_secs(300));
    let mut offset: Option<i64> = None;
    let mut backoff = Duration::from_secs(1);
    tracing::info!("telegram polling started");
    loop {
        let updates = match client.get_updates(offset, 30).await {
            Ok(u) => {
                backoff = Duration::from_secs(1);
                u
            }
            Err(e) => {
                tracing::warn!(error = %e, backoff_secs = backoff.as_secs(), "getUpdates failed");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(60));
                continue;
            }
        };

        for up in updates {
            offset = Some(up.update_id + 1);
            let Some(msg) = up.message else { continue };
            if msg.chat.kind != "private" {
                continue;
            }
            let (Some(from), Some(text)) = (msg.from, msg.text) else {
                continue;
            };
            dispatcher.dispatch(from.id, msg.chat.id, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_text() {
        assert_eq!(parse_command("/start"), Command::Start);
        assert_eq!(parse_command("/post_vacancy"), Command::PostListing);
        assert_eq!(parse_command("/Post_Listing@digest_bot now"), Command::PostListing);
        assert_eq!(parse_command("  /cancel "), Command::Cancel);
        assert_eq!(parse_command("/edit"), Command::Edit);
        assert_eq!(parse_command("/post_vacancy_free"), Command::PostVacancyFree);
        assert_eq!(parse_command("/post_ad"), Command::PostAd);
        assert_eq!(parse_command("/nope"), Command::Unknown("nope".into()));
        assert_eq!(
            parse_command("Senior Rust engineer"),
            Command::Text("Senior Rust engineer".into())
        );
    }
}
