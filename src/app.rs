// src/app.rs
//! Wires configuration into the running components.

use std::sync::Arc;

use crate::api::AppState;
use crate::bot::BotHandler;
use crate::config::AppConfig;
use crate::conversation::{ConversationCfg, ListingConversation};
use crate::generate::ContentGenerator;
use crate::ingest::fingerprint::FingerprintStore;
use crate::ingest::types::FeedFetcher;
use crate::ingest::FeedIngestor;
use crate::publish::notify::AdminNotifier;
use crate::publish::{MessageTransport, Publisher};
use crate::schedule::DigestScheduler;

pub struct Services {
    pub generator: Arc<ContentGenerator>,
    pub publisher: Arc<Publisher>,
    pub scheduler: Arc<DigestScheduler>,
    pub conversation: Arc<ListingConversation>,
    pub bot: Arc<BotHandler>,
}

impl Services {
    /// Build every component. `persist` controls whether state files under
    /// `cfg.state_dir` are used.
    pub fn build(
        cfg: &AppConfig,
        fetcher: Arc<dyn FeedFetcher>,
        generator: Arc<ContentGenerator>,
        transport: Arc<dyn MessageTransport>,
        persist: bool,
    ) -> Self {
        let store = if persist {
            FingerprintStore::open(cfg.fingerprints_path())
        } else {
            FingerprintStore::in_memory()
        };
        let ingestor = FeedIngestor::new(cfg.feeds.clone(), fetcher, Arc::new(store), cfg.ingest_cfg());

        let channel_id = cfg.channel_id.clone().unwrap_or_default();
        let notifier = Arc::new(AdminNotifier::new(Arc::clone(&transport), cfg.admin_ids.clone()));
        let publisher = Arc::new(Publisher::new(transport, &channel_id, cfg.publisher_cfg()));

        let scheduler = Arc::new(
            DigestScheduler::new(
                ingestor,
                Arc::clone(&generator),
                Arc::clone(&publisher),
                cfg.scheduler_cfg(),
                persist.then(|| cfg.scheduler_path()),
            )
            .with_notifier(notifier),
        );

        let conversation = Arc::new(ListingConversation::new(
            Arc::clone(&generator),
            Arc::clone(&publisher),
            ConversationCfg {
                session_timeout: chrono::Duration::from_std(cfg.session_timeout)
                    .unwrap_or_else(|_| chrono::Duration::minutes(30)),
                polish_enabled: cfg.polish_enabled,
                ad_polish_enabled: cfg.ad_polish_enabled,
                max_chars: cfg.max_post_length,
            },
        ));

        let bot = Arc::new(BotHandler::new(
            Arc::clone(&conversation),
            Arc::clone(&scheduler),
            cfg.admin_ids.clone(),
            cfg.tz_offset,
        ));

        Self {
            generator,
            publisher,
            scheduler,
            conversation,
            bot,
        }
    }

    pub fn app_state(&self, cfg: &AppConfig) -> AppState {
        AppState {
            scheduler: Arc::clone(&self.scheduler),
            conversation: Arc::clone(&self.conversation),
            admin_token: cfg.admin_token.clone(),
        }
    }
}
