use crate::collector::page::{normalize_item, FeedPage, NextOffset};
use crate::collector::CollectReport;
use crate::config::FeedConfig;
use crate::queue::{UpsertOutcome, WorkQueue};
use crate::requester::{endpoint_url, Credentials, RequestError, Requester};
use crate::storage::{self, Storage};
use crate::FeedpaceError;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Walks offset-paginated listings into a work queue
///
/// Runs inline in whatever task calls [`FeedCollector::collect`]; it never
/// spawns anything. The only delay between pages is the requester's
/// recommended delay.
pub struct FeedCollector {
    requester: Arc<Requester>,
    queue: WorkQueue,
    credentials: Credentials,
    base_url: String,
}

impl FeedCollector {
    pub fn new(
        requester: Arc<Requester>,
        queue: WorkQueue,
        credentials: Credentials,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            requester,
            queue,
            credentials,
            base_url: base_url.into(),
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Collects one feed into the queue
    ///
    /// Starts at the source's stored offset (0 if none) and stops when the
    /// listing reports `has_more = false` or `max_pages` pages were fetched,
    /// whichever comes first. The final offset is stored only when the run
    /// completes.
    ///
    /// # Arguments
    ///
    /// * `feed` - The listing to walk
    /// * `max_pages` - Page budget for this run; `None` means unlimited
    ///
    /// # Returns
    ///
    /// * `Ok(CollectReport)` - Page and item counts
    /// * `Err(FeedpaceError::Collect)` - The run was aborted; carries the
    ///   counts so far and the cause. The stored cursor is left untouched.
    pub async fn collect(
        &self,
        feed: &FeedConfig,
        max_pages: Option<u32>,
    ) -> crate::Result<CollectReport> {
        let endpoint = endpoint_url(&self.base_url, &feed.path)?;
        let start = self.load_offset(&feed.source)?;
        let mut report = CollectReport::new(&feed.source, start);
        let mut offset = start;
        let mut has_more = true;

        info!(
            source = %feed.source,
            queue = %self.queue.name(),
            offset,
            max_pages = ?max_pages,
            "Starting collection"
        );

        while has_more && within_budget(report.pages_fetched, max_pages) {
            let page = match self.fetch_page(feed, &endpoint, offset).await {
                Ok(page) => page,
                Err(e) => return Err(abort(feed, report, e)),
            };

            if let Err(e) = self.store_results(feed, &page, &mut report) {
                return Err(abort(feed, report, e));
            }
            report.pages_fetched += 1;

            let previous = offset;
            match &page.next_offset {
                NextOffset::Absent => {}
                NextOffset::Offset(next) => offset = *next,
                NextOffset::Invalid(raw) => {
                    warn!(
                        source = %feed.source,
                        next_offset = %raw,
                        "Unusable next_offset, advancing by page size"
                    );
                    offset += u64::from(feed.page_limit);
                }
            }

            has_more = page.has_more;
            if has_more && offset == previous {
                warn!(
                    source = %feed.source,
                    offset,
                    results = page.results.len(),
                    "Offset did not advance, treating as end of listing"
                );
                has_more = false;
            }

            if has_more && within_budget(report.pages_fetched, max_pages) {
                let delay = self.requester.recommended_delay();
                debug!(source = %feed.source, delay_ms = delay.as_millis() as u64, "Pacing before next page");
                tokio::time::sleep(delay).await;
            }
        }

        self.save_offset(&feed.source, offset)
            .map_err(|e| abort(feed, report.clone(), e))?;
        report.final_offset = offset;

        info!(
            source = %feed.source,
            pages = report.pages_fetched,
            added = report.items_added,
            updated = report.items_updated,
            offset,
            "Collection finished"
        );
        Ok(report)
    }

    /// Forgets the stored offset so the next run starts from the top
    pub fn reset_cursor(&self, source: &str) -> crate::Result<()> {
        self.save_offset(source, 0)
    }

    /// Reads the stored offset for a source
    pub fn stored_offset(&self, source: &str) -> crate::Result<Option<u64>> {
        let db = storage::lock(self.queue.storage())?;
        Ok(db.get_cursor(source)?.and_then(|c| c.parse().ok()))
    }

    async fn fetch_page(
        &self,
        feed: &FeedConfig,
        endpoint: &Url,
        offset: u64,
    ) -> crate::Result<FeedPage> {
        let mut rate_limited = 0;

        loop {
            let mut params = vec![
                ("access_token".to_string(), self.credentials.access_token()),
                ("limit".to_string(), feed.page_limit.to_string()),
                ("offset".to_string(), offset.to_string()),
            ];
            params.extend(feed.params.iter().map(|(k, v)| (k.clone(), v.clone())));

            match self.requester.get_json(endpoint.clone(), params).await {
                Ok(body) => return Ok(FeedPage::from_json(&body)?),
                Err(err @ RequestError::RateLimited { .. })
                    if rate_limited < feed.max_rate_limit_retries =>
                {
                    rate_limited += 1;
                    let delay = self.requester.recommended_delay();
                    warn!(
                        source = %feed.source,
                        offset,
                        attempt = rate_limited,
                        delay_ms = delay.as_millis() as u64,
                        "{}, waiting before retrying page",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn store_results(
        &self,
        feed: &FeedConfig,
        page: &FeedPage,
        report: &mut CollectReport,
    ) -> crate::Result<()> {
        let now = Utc::now().timestamp();
        let mut skipped = 0;

        for raw in &page.results {
            let Some(item) = normalize_item(raw, &feed.fields, now) else {
                skipped += 1;
                continue;
            };

            match self
                .queue
                .upsert(&item.key, item.ts, &feed.source, &item.metadata)?
            {
                UpsertOutcome::Inserted => report.items_added += 1,
                UpsertOutcome::Updated => report.items_updated += 1,
                UpsertOutcome::Unchanged => {}
            }
        }

        if skipped > 0 {
            report.items_skipped += skipped;
            debug!(source = %feed.source, skipped, "Skipped results without a key");
        }
        Ok(())
    }

    fn load_offset(&self, source: &str) -> crate::Result<u64> {
        let db = storage::lock(self.queue.storage())?;
        let offset = match db.get_cursor(source)? {
            None => 0,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(source, cursor = %raw, "Stored cursor is not an offset, starting at 0");
                0
            }),
        };
        Ok(offset)
    }

    fn save_offset(&self, source: &str, offset: u64) -> crate::Result<()> {
        let mut db = storage::lock(self.queue.storage())?;
        db.set_cursor(source, &offset.to_string())?;
        Ok(())
    }
}

fn within_budget(pages_fetched: u32, max_pages: Option<u32>) -> bool {
    max_pages.map_or(true, |max| pages_fetched < max)
}

fn abort(feed: &FeedConfig, report: CollectReport, cause: FeedpaceError) -> FeedpaceError {
    warn!(
        source = %feed.source,
        pages = report.pages_fetched,
        added = report.items_added,
        "Collection aborted: {}",
        cause
    );
    FeedpaceError::Collect {
        feed: feed.source.clone(),
        pages: report.pages_fetched,
        report,
        cause: Box::new(cause),
    }
}
