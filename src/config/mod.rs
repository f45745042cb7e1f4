//! Scope configuration builders.
//!
//! The three scopes (experiment, campaign, audience) share one resolution skeleton:
//! build the configured content list from scoped metadata, resolve audience gating,
//! compute the applicability gate, then select the served entry. They differ only in
//! the selection strategy — experiments bucket by weighted draw, campaigns and
//! audiences are direct lookups.
//!
//! Builders never fail: malformed or missing metadata yields `None` and the scope
//! stays inactive.

pub mod audience;
pub mod campaign;
pub mod experiment;

pub use audience::AudienceConfig;
pub use campaign::CampaignConfig;
pub use experiment::{ExperimentConfig, Status, Variant};

use crate::context::RequestContext;
use crate::metadata::ScopedMetadata;
use crate::options::EngineOptions;
use crate::Slug;

#[allow(missing_docs)]
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Parse a schedule instant. Accepts RFC 3339 as well as plain dates
/// (`2024-01-31`, `01/31/2024`), read as midnight UTC.
pub(crate) fn parse_instant(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if let Ok(instant) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&chrono::Utc));
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    log::warn!(target: "pagefork", raw; "unparseable schedule date, ignoring");
    None
}

/// Audience identifiers named by the `audience`/`audiences` metadata keys.
pub(crate) fn audience_candidates(metadata: &ScopedMetadata) -> Vec<Slug> {
    let mut candidates = Vec::new();
    for key in ["audience", "audiences"] {
        let Some(value) = metadata.get(key) else {
            continue;
        };
        for raw in value.iter() {
            for piece in raw.split(',') {
                let candidate = Slug::new(piece);
                if !candidate.is_empty() && !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
        }
    }
    candidates
}

/// Whether audience resolution allows the scope to apply. `None` means gating is
/// not applicable; an empty resolution suppresses the scope.
pub(crate) fn audience_gate(resolved: &Option<Vec<Slug>>) -> bool {
    resolved.as_ref().map_or(true, |r| !r.is_empty())
}

/// The forced audience override from the query string, if any.
pub(crate) fn forced_audience(ctx: &RequestContext, options: &EngineOptions) -> Option<Slug> {
    ctx.query(&options.audiences_query_parameter)
        .map(|value| Slug::new(&value))
        .filter(|slug| !slug.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;
    use crate::metadata::ScopedMetadata;

    #[test]
    fn parses_plain_dates_as_midnight_utc() {
        let instant = parse_instant("2024-03-01").unwrap();
        assert_eq!((instant.year(), instant.month(), instant.day()), (2024, 3, 1));
        assert_eq!(instant.hour(), 0);
        assert_eq!(parse_instant("03/01/2024"), parse_instant("2024-03-01"));
        assert!(parse_instant("soon").is_none());
    }

    #[test]
    fn audience_candidates_split_and_dedupe() {
        let mut md = ScopedMetadata::new(Slug::new("experiment"));
        md.insert(Slug::new("audience"), "Mobile, Desktop".to_owned());
        md.insert(Slug::new("audiences"), "desktop,returning".to_owned());
        assert_eq!(
            audience_candidates(&md),
            vec![Slug::new("mobile"), Slug::new("desktop"), Slug::new("returning")]
        );
    }
}
