//! Campaign configuration and resolution.
//!
//! Campaigns are direct lookups: the selected campaign comes from the campaigns
//! query parameter (or `utm_campaign`), never from bucketing.

use std::collections::HashMap;

use crate::context::RequestContext;
use crate::metadata::ScopedMetadata;
use crate::options::EngineOptions;
use crate::{audiences, Slug};

use super::{audience_candidates, audience_gate, forced_audience};

/// Metadata keys that do not name a campaign.
const RESERVED_KEYS: &[&str] = &["value", "audience", "audiences"];

/// A resolved campaign scope.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub audiences: Vec<Slug>,
    pub resolved_audiences: Option<Vec<Slug>>,
    /// Campaign id to content URL.
    pub configured_campaigns: HashMap<Slug, String>,
    pub selected_campaign: Option<Slug>,
}

impl CampaignConfig {
    /// The content URL for the selected campaign.
    pub fn selected_url(&self) -> Option<&str> {
        let selected = self.selected_campaign.as_ref()?;
        self.configured_campaigns.get(selected).map(String::as_str)
    }
}

/// Build a campaign configuration from scoped metadata.
pub async fn resolve(
    metadata: &ScopedMetadata,
    ctx: &RequestContext,
    options: &EngineOptions,
) -> Option<CampaignConfig> {
    let configured_campaigns: HashMap<Slug, String> = metadata
        .entries()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.as_scalar().to_owned()))
        .collect();
    if configured_campaigns.is_empty() {
        return None;
    }

    let audiences = audience_candidates(metadata);
    let resolved_audiences = audiences::resolve(
        &audiences,
        &options.audiences,
        forced_audience(ctx, options).as_ref(),
    )
    .await;

    let selected_campaign = if audience_gate(&resolved_audiences) {
        let requested = ctx
            .query(&options.campaigns_query_parameter)
            .or_else(|| ctx.query("utm_campaign"))
            .map(|value| Slug::new(&value))
            .filter(|slug| !slug.is_empty());
        requested.filter(|campaign| configured_campaigns.contains_key(campaign))
    } else {
        None
    };

    Some(CampaignConfig {
        audiences,
        resolved_audiences,
        configured_campaigns,
        selected_campaign,
    })
}
