//! Keyword classification of maintenance tickets. Pure functions over the
//! lower-cased subject+description text; the engine decides what to do with
//! the classification.

use crate::config::{KeywordConfig, PackageCatalog, ServicePackage};

/// Where a ticket should go. Upgrade keywords win over support keywords, but
/// only when a concrete package resolves from the text.
#[derive(Debug, PartialEq)]
pub enum TicketRoute<'a> {
    Upgrade(&'a ServicePackage),
    Support,
    Unmatched,
}

pub fn classify<'a>(
    text: &str,
    keywords: &KeywordConfig,
    catalog: &'a PackageCatalog,
) -> TicketRoute<'a> {
    let text = text.to_lowercase();

    if contains_any(&text, &keywords.upgrade) {
        if let Some(pkg) = resolve_package(&text, catalog) {
            return TicketRoute::Upgrade(pkg);
        }
        // No package resolved from the text: fall through to support.
    }

    if contains_any(&text, &keywords.support) {
        TicketRoute::Support
    } else {
        TicketRoute::Unmatched
    }
}

fn contains_any(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|kw| text.contains(kw.as_str()))
}

fn resolve_package<'a>(text: &str, catalog: &'a PackageCatalog) -> Option<&'a ServicePackage> {
    speed_tokens(text)
        .into_iter()
        .find_map(|token| catalog.resolve_speed_token(&token))
}

/// Tokens that look like speed tiers: "1g", "2g", "gigabit", "gig".
fn speed_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| is_speed_token(token))
        .map(str::to_string)
        .collect()
}

fn is_speed_token(token: &str) -> bool {
    if token == "gigabit" || token == "gig" {
        return true;
    }
    match token.strip_suffix('g') {
        Some(digits) => !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}
