//! Content selection for write actions
//!
//! Comments and broadcasts carry text. The worker asks a [`ContentSelector`]
//! for it once per claimed item, right before performing the action.

mod template;

pub use template::{render_template, validate_template};

use crate::config::TemplateConfig;
use crate::ContentError;
use rand::Rng;

/// Chooses and renders the text sent with an action
pub trait ContentSelector: Send + Sync {
    /// Returns rendered text
    ///
    /// # Arguments
    ///
    /// * `explicit` - Name of a specific template to use; random when `None`
    fn select_content(&self, explicit: Option<&str>) -> Result<String, ContentError>;
}

/// A named template
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub body: String,
}

/// Picks one of a queue's templates and renders its choice blocks
#[derive(Debug, Clone, Default)]
pub struct TemplateSelector {
    templates: Vec<Template>,
}

impl TemplateSelector {
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    /// Builds a selector from the templates configured for `queue`
    pub fn from_config<'a>(templates: impl IntoIterator<Item = &'a TemplateConfig>) -> Self {
        Self::new(
            templates
                .into_iter()
                .map(|t| Template {
                    name: t.name.clone(),
                    body: t.body.clone(),
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl ContentSelector for TemplateSelector {
    fn select_content(&self, explicit: Option<&str>) -> Result<String, ContentError> {
        let mut rng = rand::rng();

        let template = match explicit {
            Some(name) => self
                .templates
                .iter()
                .find(|t| t.name == name)
                .ok_or_else(|| ContentError::UnknownTemplate(name.to_string()))?,
            None => {
                if self.templates.is_empty() {
                    return Err(ContentError::NoContentAvailable);
                }
                &self.templates[rng.random_range(0..self.templates.len())]
            }
        };

        validate_template(&template.body)?;
        render_template(&template.body, &mut rng)
    }
}
