//! Audience-scope configuration and resolution.
//!
//! The audience scope serves audience-specific content directly: each metadata key
//! names an audience and maps it to a content URL; the first resolved audience with
//! configured content wins. No bucketing.

use std::collections::HashMap;

use crate::context::RequestContext;
use crate::metadata::{ScopedMetadata, VALUE_KEY};
use crate::options::EngineOptions;
use crate::{audiences, Slug};

use super::forced_audience;

/// A resolved audience scope.
#[derive(Debug, Clone)]
pub struct AudienceConfig {
    /// Candidate audiences, in configuration order.
    pub audiences: Vec<Slug>,
    pub resolved_audiences: Option<Vec<Slug>>,
    /// Audience id to content URL.
    pub configured_audiences: HashMap<Slug, String>,
    pub selected_audience: Option<Slug>,
}

impl AudienceConfig {
    /// The content URL for the selected audience.
    pub fn selected_url(&self) -> Option<&str> {
        let selected = self.selected_audience.as_ref()?;
        self.configured_audiences.get(selected).map(String::as_str)
    }
}

/// Build an audience configuration from scoped metadata.
pub async fn resolve(
    metadata: &ScopedMetadata,
    ctx: &RequestContext,
    options: &EngineOptions,
) -> Option<AudienceConfig> {
    let mut candidates = Vec::new();
    let mut configured_audiences = HashMap::new();
    for (key, value) in metadata.entries() {
        if key.as_str() == VALUE_KEY {
            continue;
        }
        candidates.push(key.clone());
        configured_audiences.insert(key.clone(), value.as_scalar().to_owned());
    }
    if configured_audiences.is_empty() {
        return None;
    }

    let resolved_audiences = audiences::resolve(
        &candidates,
        &options.audiences,
        forced_audience(ctx, options).as_ref(),
    )
    .await;

    // First resolved audience with configured content wins.
    let selected_audience = resolved_audiences
        .as_ref()
        .and_then(|resolved| {
            resolved
                .iter()
                .find(|audience| configured_audiences.contains_key(*audience))
        })
        .cloned();

    Some(AudienceConfig {
        audiences: candidates,
        resolved_audiences,
        configured_audiences,
        selected_audience,
    })
}
