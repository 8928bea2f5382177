use crate::config::types::{
    ActionConfig, ApiConfig, Config, FeedConfig, RateLimitConfig, TemplateConfig, WorkerConfig,
};
use crate::content::validate_template;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Largest page size the platform accepts on listing endpoints
const MAX_PAGE_LIMIT: u32 = 120;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_api_config(&config.api)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_worker_config(&config.worker)?;

    if config.storage.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    let queues = validate_actions(&config.actions)?;
    validate_feeds(&config.feeds, &queues)?;
    validate_templates(&config.templates, &config.actions)?;
    Ok(())
}

fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.request_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.max_retry_after_ms < config.default_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max-retry-after-ms ({}) must be >= default-delay-ms ({})",
            config.max_retry_after_ms, config.default_delay_ms
        )));
    }

    if config.backoff_max_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff-max-ms ({}) must be >= backoff-base-ms ({})",
            config.backoff_max_ms, config.backoff_base_ms
        )));
    }

    Ok(())
}

fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.max_consecutive_failures < 1 {
        return Err(ConfigError::Validation(format!(
            "max-consecutive-failures must be >= 1, got {}",
            config.max_consecutive_failures
        )));
    }

    // An idle worker must never spin on the database
    if config.idle_poll_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "idle-poll-interval-ms must be >= 10ms, got {}ms",
            config.idle_poll_interval_ms
        )));
    }

    Ok(())
}

/// Validates action entries and returns the set of declared queues
fn validate_actions(actions: &[ActionConfig]) -> Result<HashSet<String>, ConfigError> {
    let mut queues = HashSet::new();

    for action in actions {
        validate_name("queue", &action.queue)?;

        if !queues.insert(action.queue.clone()) {
            return Err(ConfigError::Validation(format!(
                "Queue '{}' has more than one action",
                action.queue
            )));
        }

        if !action.path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "Action path for queue '{}' must start with '/', got '{}'",
                action.queue, action.path
            )));
        }

        if action.kind.needs_content() && action.content_field.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Action for queue '{}' needs a content-field",
                action.queue
            )));
        }
    }

    Ok(queues)
}

fn validate_feeds(feeds: &[FeedConfig], queues: &HashSet<String>) -> Result<(), ConfigError> {
    let mut sources = HashSet::new();

    for feed in feeds {
        validate_name("source", &feed.source)?;

        if !sources.insert(feed.source.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate feed source '{}'",
                feed.source
            )));
        }

        if !queues.contains(&feed.queue) {
            return Err(ConfigError::Validation(format!(
                "Feed '{}' targets undeclared queue '{}'",
                feed.source, feed.queue
            )));
        }

        if feed.page_limit < 1 || feed.page_limit > MAX_PAGE_LIMIT {
            return Err(ConfigError::Validation(format!(
                "page-limit for feed '{}' must be between 1 and {}, got {}",
                feed.source, MAX_PAGE_LIMIT, feed.page_limit
            )));
        }

        if feed.max_pages == Some(0) {
            return Err(ConfigError::Validation(format!(
                "max-pages for feed '{}' must be >= 1 when set",
                feed.source
            )));
        }

        if feed.fields.key.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Feed '{}' must name a key field",
                feed.source
            )));
        }
    }

    Ok(())
}

fn validate_templates(
    templates: &[TemplateConfig],
    actions: &[ActionConfig],
) -> Result<(), ConfigError> {
    for template in templates {
        if !actions.iter().any(|a| a.queue == template.queue) {
            return Err(ConfigError::Validation(format!(
                "Template '{}' targets undeclared queue '{}'",
                template.name, template.queue
            )));
        }

        validate_template(&template.body).map_err(|e| {
            ConfigError::Validation(format!("Template '{}': {}", template.name, e))
        })?;
    }

    for action in actions.iter().filter(|a| a.kind.needs_content()) {
        if !templates.iter().any(|t| t.queue == action.queue) {
            return Err(ConfigError::Validation(format!(
                "Queue '{}' performs a {} action but has no templates",
                action.queue,
                action.kind.as_str()
            )));
        }
    }

    Ok(())
}

/// Queue and source names double as database keys and log fields
fn validate_name(what: &str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(format!("{} cannot be empty", what)));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "{} must contain only alphanumeric characters, hyphens and underscores, got '{}'",
            what, name
        )));
    }

    Ok(())
}
