//! The write action a worker performs for each claimed item

use crate::config::ActionConfig;
use crate::content::ContentSelector;
use crate::requester::{
    endpoint_url, target_url, ApiRequest, Credentials, ErrorKind, RequestError, Requester,
};
use crate::ContentError;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Why one action attempt failed
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("{0}")]
    Request(#[from] RequestError),

    #[error("{0}")]
    Content(#[from] ContentError),
}

impl ActionError {
    /// Content that cannot be produced counts as a client error for the attempt
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Request(e) => e.kind(),
            Self::Content(_) => ErrorKind::Client,
        }
    }

    /// Returns true if retrying this item can never succeed
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Request(e) => e.is_target_gone(),
            Self::Content(_) => false,
        }
    }
}

/// What a successful action produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionReceipt {
    /// The `id` field of the response, when present
    pub remote_id: Option<String>,
    /// Text that was sent
    pub content: Option<String>,
}

/// Performs `POST {base}{path}/{key}` for one queue
pub struct ActionRunner {
    requester: Arc<Requester>,
    credentials: Credentials,
    config: ActionConfig,
    endpoint: Url,
    content: Option<Arc<dyn ContentSelector>>,
}

impl ActionRunner {
    /// Creates a runner for one action
    ///
    /// # Arguments
    ///
    /// * `requester` - Channel for the remote call
    /// * `credentials` - Token sent with every action
    /// * `base_url` - API base URL
    /// * `config` - The action definition
    /// * `content` - Required for actions that carry text
    pub fn new(
        requester: Arc<Requester>,
        credentials: Credentials,
        base_url: &str,
        config: ActionConfig,
        content: Option<Arc<dyn ContentSelector>>,
    ) -> crate::Result<Self> {
        let endpoint = endpoint_url(base_url, &config.path)?;
        Ok(Self {
            requester,
            credentials,
            config,
            endpoint,
            content,
        })
    }

    pub fn requester(&self) -> &Arc<Requester> {
        &self.requester
    }

    /// Performs the action against one item
    ///
    /// # Arguments
    ///
    /// * `key` - Target identifier, appended to the action path
    /// * `template` - Explicit template name for actions that carry text
    pub async fn perform(
        &self,
        key: &str,
        template: Option<&str>,
    ) -> Result<ActionReceipt, ActionError> {
        let content = if self.config.kind.needs_content() {
            let selector = self
                .content
                .as_ref()
                .ok_or(ContentError::NoContentAvailable)?;
            Some(selector.select_content(template)?)
        } else {
            None
        };

        let url = target_url(&self.endpoint, key)
            .map_err(|e| RequestError::Client {
                status: 400,
                message: e.to_string(),
            })?;

        let mut request =
            ApiRequest::post(url).field("access_token", self.credentials.access_token());
        if let Some(text) = &content {
            request = request.field(self.config.content_field.clone(), text.clone());
        }

        let response = self.requester.execute(request).await?;
        Ok(ActionReceipt {
            remote_id: remote_id(&response.body),
            content,
        })
    }
}

fn remote_id(body: &Value) -> Option<String> {
    match body.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_id() {
        assert_eq!(remote_id(&json!({"id": "c-1"})).as_deref(), Some("c-1"));
        assert_eq!(remote_id(&json!({"id": 17})).as_deref(), Some("17"));
        assert_eq!(remote_id(&json!({"success": true})), None);
        assert_eq!(remote_id(&Value::Null), None);
    }

    #[test]
    fn test_error_kinds() {
        let content: ActionError = ContentError::NoContentAvailable.into();
        assert_eq!(content.kind(), ErrorKind::Client);
        assert!(!content.is_permanent());

        let gone: ActionError = RequestError::Client {
            status: 404,
            message: "not found".to_string(),
        }
        .into();
        assert!(gone.is_permanent());

        let limited: ActionError = RequestError::RateLimited {
            status: 429,
            retry_after: None,
        }
        .into();
        assert_eq!(limited.kind(), ErrorKind::RateLimited);
    }
}
