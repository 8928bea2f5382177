//! Message templates with random choice blocks
//!
//! A template is plain text in which `{first|second|third}` blocks are replaced
//! by one of their options at render time, so repeated comments don't read as
//! identical copies.

use crate::ContentError;
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

fn choice_block() -> Result<&'static Regex, ContentError> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]*)\}").ok())
        .as_ref()
        .ok_or_else(|| ContentError::InvalidTemplate("choice pattern failed to compile".to_string()))
}

/// Checks that a template can be rendered
///
/// Rules:
/// - braces must be balanced and not nested
/// - every block needs at least two options
/// - no option may be empty or whitespace
pub fn validate_template(template: &str) -> Result<(), ContentError> {
    if template.trim().is_empty() {
        return Err(ContentError::InvalidTemplate("template is empty".to_string()));
    }

    let mut depth = 0usize;
    for (pos, c) in template.char_indices() {
        match c {
            '{' => {
                depth += 1;
                if depth > 1 {
                    return Err(ContentError::InvalidTemplate(format!(
                        "nested '{{' at byte {}",
                        pos
                    )));
                }
            }
            '}' => {
                if depth == 0 {
                    return Err(ContentError::InvalidTemplate(format!(
                        "unmatched '}}' at byte {}",
                        pos
                    )));
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ContentError::InvalidTemplate("unclosed '{'".to_string()));
    }

    for caps in choice_block()?.captures_iter(template) {
        let block = &caps[1];
        let options: Vec<&str> = block.split('|').collect();
        if options.len() < 2 {
            return Err(ContentError::InvalidTemplate(format!(
                "block '{{{}}}' needs at least two options",
                block
            )));
        }
        if options.iter().any(|o| o.trim().is_empty()) {
            return Err(ContentError::InvalidTemplate(format!(
                "block '{{{}}}' has an empty option",
                block
            )));
        }
    }

    Ok(())
}

/// Replaces every choice block with one randomly picked option
pub fn render_template<R: Rng + ?Sized>(
    template: &str,
    rng: &mut R,
) -> Result<String, ContentError> {
    let rendered = choice_block()?.replace_all(template, |caps: &regex::Captures<'_>| {
        let options: Vec<&str> = caps[1].split('|').collect();
        let pick = rng.random_range(0..options.len());
        options[pick].trim().to_string()
    });
    Ok(rendered.into_owned())
}
