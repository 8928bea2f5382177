//! Control surface for automation categories
//!
//! Each configured action (favourite, comment, broadcast) is one
//! [`Automation`]: a queue, the worker draining it and the collectors feeding
//! it. An [`AutomationSet`] wires them all from a [`Config`] over one shared
//! database.

use crate::collector::{CollectReport, FeedCollector};
use crate::config::{ActionConfig, ActionKind, Config, FeedConfig};
use crate::content::{ContentSelector, TemplateSelector};
use crate::queue::{QueueItem, QueueStats, WorkQueue};
use crate::requester::{Credentials, Requester};
use crate::state::{ItemStatus, RunState};
use crate::storage::{self, ActionLogRecord, SharedStorage, Storage};
use crate::worker::{ActionRunner, StartOptions, WorkerLoop, WorkerStatus};
use crate::FeedpaceError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One automation category
pub struct Automation {
    action: ActionConfig,
    feeds: Vec<FeedConfig>,
    worker: WorkerLoop,
    collector: FeedCollector,
}

impl Automation {
    /// Queue name, which also names the category
    pub fn name(&self) -> &str {
        &self.action.queue
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind
    }

    /// Feeds that collect into this category's queue
    pub fn feeds(&self) -> &[FeedConfig] {
        &self.feeds
    }

    pub fn queue(&self) -> &WorkQueue {
        self.worker.queue()
    }

    pub fn requester(&self) -> &Arc<Requester> {
        self.worker.requester()
    }

    pub fn start(&self, options: StartOptions) -> crate::Result<WorkerStatus> {
        self.worker.start(options)
    }

    pub fn stop(&self) -> WorkerStatus {
        self.worker.stop()
    }

    pub fn get_status(&self) -> WorkerStatus {
        self.worker.get_status()
    }

    pub async fn shutdown(&self, timeout: Duration) -> WorkerStatus {
        self.worker.shutdown(timeout).await
    }

    /// Collects one of this category's feeds
    ///
    /// # Arguments
    ///
    /// * `source` - Feed name
    /// * `max_pages` - Page budget; `None` uses the feed's configured
    ///   `max-pages`, which may itself be unlimited
    pub async fn collect(
        &self,
        source: &str,
        max_pages: Option<u32>,
    ) -> crate::Result<CollectReport> {
        let feed = self
            .feeds
            .iter()
            .find(|f| f.source == source)
            .ok_or_else(|| FeedpaceError::UnknownSource(source.to_string()))?;
        self.collector
            .collect(feed, max_pages.or(feed.max_pages))
            .await
    }

    /// Makes the source's next collection start from offset 0
    pub fn reset_cursor(&self, source: &str) -> crate::Result<()> {
        if !self.feeds.iter().any(|f| f.source == source) {
            return Err(FeedpaceError::UnknownSource(source.to_string()));
        }
        self.collector.reset_cursor(source)
    }

    /// Offset the source's next collection starts from, if one was stored
    pub fn cursor(&self, source: &str) -> crate::Result<Option<u64>> {
        self.collector.stored_offset(source)
    }

    /// Returns every failed item to pending with zero attempts
    pub fn reset_failed(&self) -> crate::Result<u64> {
        self.queue().reset_failed_to_pending()
    }

    pub fn list_pending(&self, limit: u32) -> crate::Result<Vec<QueueItem>> {
        self.queue().list_pending(limit)
    }

    pub fn list_queue(
        &self,
        status: Option<ItemStatus>,
        limit: u32,
    ) -> crate::Result<Vec<QueueItem>> {
        self.queue().list(status, limit)
    }

    /// Deletes items, optionally only those with `status`
    pub fn clear_queue(&self, status: Option<ItemStatus>) -> crate::Result<u64> {
        self.queue().clear(status)
    }

    pub fn remove(&self, keys: &[String]) -> crate::Result<u64> {
        self.queue().remove(keys)
    }

    pub fn queue_stats(&self) -> crate::Result<QueueStats> {
        self.queue().stats()
    }

    pub fn recent_actions(&self, limit: u32) -> crate::Result<Vec<ActionLogRecord>> {
        let db = storage::lock(self.queue().storage())?;
        Ok(db.recent_actions(Some(self.name()), limit)?)
    }
}

/// All configured automations over one database
pub struct AutomationSet {
    storage: SharedStorage,
    credentials: Credentials,
    automations: Vec<Automation>,
    shutdown_timeout: Duration,
}

impl AutomationSet {
    /// Wires every `[[actions]]` entry of a validated config
    ///
    /// Requesters are created per category, or once for all categories when
    /// `rate-limit.shared-pacing` is set.
    ///
    /// # Arguments
    ///
    /// * `config` - A validated configuration
    /// * `access_token` - OAuth token sent with every call
    pub fn from_config(config: &Config, access_token: &str) -> crate::Result<Self> {
        let storage = storage::open_shared(Path::new(&config.storage.database_path))?;
        Self::with_storage(config, access_token, storage)
    }

    /// Like [`AutomationSet::from_config`] over an already open database
    pub fn with_storage(
        config: &Config,
        access_token: &str,
        storage: SharedStorage,
    ) -> crate::Result<Self> {
        let credentials = Credentials::new(access_token);
        let shared = if config.rate_limit.shared_pacing {
            Some(Arc::new(Requester::new(&config.api, &config.rate_limit)?))
        } else {
            None
        };

        let mut automations = Vec::with_capacity(config.actions.len());
        for action in &config.actions {
            let requester = match &shared {
                Some(requester) => Arc::clone(requester),
                None => Arc::new(Requester::new(&config.api, &config.rate_limit)?),
            };

            let queue = WorkQueue::new(
                Arc::clone(&storage),
                action.queue.clone(),
                config.worker.max_attempts,
            );

            let content: Option<Arc<dyn ContentSelector>> = if action.kind.needs_content() {
                Some(Arc::new(TemplateSelector::from_config(
                    config.templates_for(&action.queue),
                )))
            } else {
                None
            };

            let runner = ActionRunner::new(
                Arc::clone(&requester),
                credentials.clone(),
                &config.api.base_url,
                action.clone(),
                content,
            )?;
            let collector = FeedCollector::new(
                requester,
                queue.clone(),
                credentials.clone(),
                config.api.base_url.clone(),
            );

            automations.push(Automation {
                action: action.clone(),
                feeds: config
                    .feeds
                    .iter()
                    .filter(|f| f.queue == action.queue)
                    .cloned()
                    .collect(),
                worker: WorkerLoop::new(queue, runner, config.worker.clone()),
                collector,
            });
        }

        info!(
            automations = automations.len(),
            shared_pacing = config.rate_limit.shared_pacing,
            "Automations ready"
        );

        Ok(Self {
            storage,
            credentials,
            automations,
            shutdown_timeout: config.worker.shutdown_timeout(),
        })
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn iter(&self) -> impl Iterator<Item = &Automation> {
        self.automations.iter()
    }

    /// Looks up an automation by queue name
    pub fn get(&self, queue: &str) -> crate::Result<&Automation> {
        self.automations
            .iter()
            .find(|a| a.name() == queue)
            .ok_or_else(|| FeedpaceError::UnknownQueue(queue.to_string()))
    }

    /// Finds the automation a feed collects into
    pub fn for_source(&self, source: &str) -> crate::Result<&Automation> {
        self.automations
            .iter()
            .find(|a| a.feeds.iter().any(|f| f.source == source))
            .ok_or_else(|| FeedpaceError::UnknownSource(source.to_string()))
    }

    /// Collects a feed into whichever queue it is configured for
    pub async fn collect(
        &self,
        source: &str,
        max_pages: Option<u32>,
    ) -> crate::Result<CollectReport> {
        self.for_source(source)?.collect(source, max_pages).await
    }

    /// Replaces the access token used by every automation
    ///
    /// Workers stopped with `auth_error` pick the new token up on their next
    /// `start()`.
    pub fn set_access_token(&self, token: &str) {
        self.credentials.set(token);
        info!("Access token updated");
    }

    /// Resolves queue names; an empty list selects every automation
    pub fn select(&self, queues: &[String]) -> crate::Result<Vec<&Automation>> {
        if queues.is_empty() {
            return Ok(self.automations.iter().collect());
        }
        queues.iter().map(|q| self.get(q)).collect()
    }

    /// Starts the selected workers
    ///
    /// # Arguments
    ///
    /// * `queues` - Queue names; empty starts every worker
    /// * `options` - Passed to each worker's `start()`
    pub fn start_all(
        &self,
        queues: &[String],
        options: &StartOptions,
    ) -> crate::Result<Vec<WorkerStatus>> {
        self.select(queues)?
            .into_iter()
            .map(|a| a.start(options.clone()))
            .collect()
    }

    /// Status of every worker that has been started at least once
    pub fn status_all(&self) -> Vec<WorkerStatus> {
        self.automations
            .iter()
            .map(Automation::get_status)
            .filter(|s| s.state != RunState::NotStarted)
            .collect()
    }

    /// Returns true once no started worker is running or stopping
    pub fn all_stopped(&self) -> bool {
        self.status_all().iter().all(|s| !s.state.is_active())
    }

    /// Stops every started worker, waiting up to the configured timeout for each
    pub async fn shutdown_all(&self) -> Vec<WorkerStatus> {
        let mut statuses = Vec::with_capacity(self.automations.len());
        for automation in &self.automations {
            let status = automation.shutdown(self.shutdown_timeout).await;
            if status.state != RunState::NotStarted {
                statuses.push(status);
            }
        }
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, RateLimitConfig, StorageConfig, TemplateConfig, WorkerConfig};
    use crate::storage::SqliteStorage;
    use std::sync::Mutex;

    fn config(shared_pacing: bool) -> Config {
        Config {
            api: ApiConfig {
                base_url: "http://127.0.0.1:9/api".to_string(),
                user_agent: "feedpace-test".to_string(),
                request_timeout_ms: 1_000,
                access_token: None,
            },
            rate_limit: RateLimitConfig {
                shared_pacing,
                ..RateLimitConfig::default()
            },
            worker: WorkerConfig::default(),
            storage: StorageConfig {
                database_path: ":memory:".to_string(),
            },
            feeds: vec![FeedConfig {
                source: "watch".to_string(),
                queue: "comments".to_string(),
                path: "/browse/watch".to_string(),
                page_limit: 10,
                max_pages: Some(1),
                max_rate_limit_retries: 1,
                params: Default::default(),
                fields: Default::default(),
            }],
            actions: vec![
                ActionConfig {
                    queue: "faves".to_string(),
                    kind: ActionKind::Favourite,
                    path: "/collections/fave".to_string(),
                    content_field: "body".to_string(),
                },
                ActionConfig {
                    queue: "comments".to_string(),
                    kind: ActionKind::Comment,
                    path: "/comments/post".to_string(),
                    content_field: "body".to_string(),
                },
            ],
            templates: vec![TemplateConfig {
                queue: "comments".to_string(),
                name: "thanks".to_string(),
                body: "Thanks!".to_string(),
            }],
        }
    }

    fn set(shared_pacing: bool) -> AutomationSet {
        let storage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        AutomationSet::with_storage(&config(shared_pacing), "token", storage).unwrap()
    }

    #[test]
    fn test_lookup() {
        let set = set(false);
        assert_eq!(set.iter().count(), 2);
        assert_eq!(set.get("faves").unwrap().kind(), ActionKind::Favourite);
        assert_eq!(set.for_source("watch").unwrap().name(), "comments");
        assert!(matches!(set.get("nope"), Err(FeedpaceError::UnknownQueue(_))));
        assert!(matches!(set.for_source("nope"), Err(FeedpaceError::UnknownSource(_))));
    }

    #[test]
    fn test_pacing_modes() {
        let separate = set(false);
        let a = separate.get("faves").unwrap().requester();
        let b = separate.get("comments").unwrap().requester();
        assert!(!Arc::ptr_eq(a, b));

        let shared = set(true);
        let a = shared.get("faves").unwrap().requester();
        let b = shared.get("comments").unwrap().requester();
        assert!(Arc::ptr_eq(a, b));
    }

    #[tokio::test]
    async fn test_collect_unknown_source_on_category() {
        let set = set(false);
        let err = set
            .get("faves")
            .unwrap()
            .collect("watch", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedpaceError::UnknownSource(_)));
    }

    #[test]
    fn test_queue_admin_operations() {
        let set = set(false);
        let faves = set.get("faves").unwrap();
        let queue = faves.queue();
        for (key, ts) in [("a", 1), ("b", 2)] {
            queue
                .upsert(key, ts, "manual", &Default::default())
                .unwrap();
        }

        let pending = faves.list_pending(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].key, "b");

        assert_eq!(faves.remove(&["a".to_string()]).unwrap(), 1);
        assert_eq!(faves.queue_stats().unwrap().pending, 1);
        assert_eq!(faves.clear_queue(None).unwrap(), 1);
        assert_eq!(faves.reset_failed().unwrap(), 0);

        // Queues are isolated from each other
        assert_eq!(set.get("comments").unwrap().queue_stats().unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_set_lifecycle() {
        let set = set(false);
        assert!(set.status_all().is_empty());
        assert!(set.all_stopped());

        let started = set
            .start_all(&["faves".to_string()], &StartOptions::default())
            .unwrap();
        assert_eq!(started.len(), 1);
        assert!(started[0].running);
        assert!(!set.all_stopped());

        let statuses = set.status_all();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].queue, "faves");

        let stopped = set.shutdown_all().await;
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].state, RunState::Stopped);
        assert_eq!(stopped[0].stop_reason, Some(crate::StopReason::Requested));
        assert!(set.all_stopped());

        assert!(matches!(
            set.start_all(&["nope".to_string()], &StartOptions::default()),
            Err(FeedpaceError::UnknownQueue(_))
        ));
        assert_eq!(set.select(&[]).unwrap().len(), 2);
    }
}
