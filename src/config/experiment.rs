//! Experiment configuration and resolution.

use std::collections::HashMap;

use crate::context::RequestContext;
use crate::decision::{self, DecisionPolicy, WeightedVariant};
use crate::metadata::ScopedMetadata;
use crate::options::EngineOptions;
use crate::{audiences, Slug};

use super::{audience_candidates, audience_gate, forced_audience, parse_instant, Timestamp};

pub(crate) const CONTROL: &str = "control";

/// Lifecycle status of an experiment. Anything other than an explicitly active
/// marker deactivates the experiment; a missing status counts as active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Inactive,
}

impl Status {
    pub fn parse(raw: Option<&str>) -> Status {
        match raw {
            None => Status::Active,
            Some(raw) => {
                if matches!(raw.trim().to_lowercase().as_str(), "active" | "on" | "true") {
                    Status::Active
                } else {
                    Status::Inactive
                }
            }
        }
    }

    pub fn is_active(self) -> bool {
        self == Status::Active
    }
}

/// One content version competing in an experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub id: Slug,
    pub label: String,
    /// Fraction of traffic, as a 2-decimal string (e.g. `"0.33"`).
    pub percentage_split: String,
    /// URL paths serving this variant's content. Never empty.
    pub pages: Vec<String>,
}

/// A resolved experiment.
///
/// `run` is computed once from the forced override, status, schedule window and
/// audience resolution; `selected_variant` is assigned once and present iff `run`.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub id: Slug,
    pub label: String,
    pub status: Status,
    pub audiences: Vec<Slug>,
    pub resolved_audiences: Option<Vec<Slug>>,
    pub start_date: Option<Timestamp>,
    pub end_date: Option<Timestamp>,
    pub variants: HashMap<Slug, Variant>,
    /// Variant ids in declaration order, control first.
    pub variant_names: Vec<Slug>,
    pub run: bool,
    pub selected_variant: Option<Slug>,
}

impl ExperimentConfig {
    /// The first page configured for `variant`.
    pub fn page_for(&self, variant: &Slug) -> Option<&str> {
        self.variants
            .get(variant)
            .and_then(|v| v.pages.first())
            .map(String::as_str)
    }

    /// The weighted decision node for this experiment's variants.
    pub fn decision_policy(&self) -> DecisionPolicy {
        DecisionPolicy::new(
            self.variant_names
                .iter()
                .map(|name| WeightedVariant {
                    id: name.clone(),
                    weight: self
                        .variants
                        .get(name)
                        .and_then(|v| v.percentage_split.parse::<f64>().ok())
                        .unwrap_or(0.0)
                        * 100.0,
                })
                .collect(),
        )
    }
}

/// Build an experiment configuration from scoped metadata.
///
/// Returns `None` when the metadata does not describe an experiment (no id, no
/// variants); the scope is then silently inactive.
pub async fn resolve(
    metadata: &ScopedMetadata,
    ctx: &RequestContext,
    options: &EngineOptions,
) -> Option<ExperimentConfig> {
    let id = Slug::new(metadata.own_value()?);
    if id.is_empty() {
        return None;
    }
    let (variant_names, challenger_pages) = variant_pages(metadata, ctx)?;
    let label = metadata
        .scalar("name")
        .map(str::to_owned)
        .unwrap_or_else(|| id.to_string());

    let splits = decision::infer_splits(&explicit_splits(metadata, variant_names.len()));
    let variants = build_variants(&variant_names, &challenger_pages, &splits, ctx);

    let audiences = audience_candidates(metadata);
    let resolved_audiences = audiences::resolve(
        &audiences,
        &options.audiences,
        forced_audience(ctx, options).as_ref(),
    )
    .await;

    let status = Status::parse(metadata.scalar("status"));
    let start_date = metadata.scalar("start-date").and_then(parse_instant);
    let end_date = metadata.scalar("end-date").and_then(parse_instant);

    let forced = decision::forced_variant(
        &ctx.query_all(&options.experiments_query_parameter),
        &id,
        &variant_names,
    );

    let now = chrono::Utc::now();
    let in_window =
        start_date.map_or(true, |start| now >= start) && end_date.map_or(true, |end| now <= end);
    let run = forced.is_some()
        || (status.is_active() && in_window && audience_gate(&resolved_audiences));

    let mut config = ExperimentConfig {
        id,
        label,
        status,
        audiences,
        resolved_audiences,
        start_date,
        end_date,
        variants,
        variant_names,
        run,
        selected_variant: None,
    };
    if run {
        config.selected_variant = select_variant(&config, forced, options);
        log::debug!(target: "pagefork",
            experiment = config.id,
            variant = config.selected_variant.as_ref().map(|v| v.as_str()).unwrap_or("");
            "experiment resolved");
    }
    Some(config)
}

/// Build a fragment experiment from a grouped manifest entry.
///
/// Fragment experiments carry no status, schedule or audience metadata; they are
/// always eligible and differ from inline experiments only in where their variant
/// list comes from.
pub fn resolve_fragment(
    experiment: &Slug,
    urls: &[String],
    ctx: &RequestContext,
    options: &EngineOptions,
) -> Option<ExperimentConfig> {
    if experiment.is_empty() || urls.is_empty() {
        return None;
    }
    let challenger_pages: Vec<String> = urls
        .iter()
        .filter_map(|raw| ctx.resolve(raw).ok().map(|url| url.path().to_owned()))
        .collect();
    if challenger_pages.is_empty() {
        return None;
    }
    let variant_names = names_for(challenger_pages.len());
    let splits = decision::infer_splits(&vec![None; variant_names.len()]);
    let variants = build_variants(&variant_names, &challenger_pages, &splits, ctx);
    let forced = decision::forced_variant(
        &ctx.query_all(&options.experiments_query_parameter),
        experiment,
        &variant_names,
    );

    let mut config = ExperimentConfig {
        id: experiment.clone(),
        label: experiment.to_string(),
        status: Status::Active,
        audiences: Vec::new(),
        resolved_audiences: None,
        start_date: None,
        end_date: None,
        variants,
        variant_names,
        run: true,
        selected_variant: None,
    };
    config.selected_variant = select_variant(&config, forced, options);
    Some(config)
}

fn select_variant(
    config: &ExperimentConfig,
    forced: Option<Slug>,
    options: &EngineOptions,
) -> Option<Slug> {
    if let Some(variant) = forced {
        return Some(variant);
    }
    if let Some(recorded) = options.assignment_store.recorded(&config.id) {
        if config.variant_names.contains(&recorded) {
            return Some(recorded);
        }
    }
    let selected = config
        .decision_policy()
        .decide(&mut rand::thread_rng())
        .cloned();
    if let Some(variant) = &selected {
        options.assignment_store.record(&config.id, variant);
    }
    selected
}

/// Variant names for `challengers` challenger pages: control first, then
/// `challenger-1` through `challenger-n`.
fn names_for(challengers: usize) -> Vec<Slug> {
    let mut names = Vec::with_capacity(challengers + 1);
    names.push(Slug::new(CONTROL));
    names.extend((1..=challengers).map(|i| Slug::new(&format!("challenger-{i}"))));
    names
}

/// Derive variant names and challenger pages from metadata.
///
/// The `variants` key is either a challenger count — an instant experiment running
/// against the current page — or a list of URLs. The legacy `url` key configures a
/// single challenger.
fn variant_pages(
    metadata: &ScopedMetadata,
    ctx: &RequestContext,
) -> Option<(Vec<Slug>, Vec<String>)> {
    let challenger_pages: Vec<String> = match metadata.get("variants") {
        Some(value) => {
            let joined = value.iter().collect::<Vec<_>>().join(",");
            if let Ok(count) = joined.trim().parse::<usize>() {
                vec![ctx.path().to_owned(); count]
            } else {
                value
                    .iter()
                    .flat_map(|v| v.split(','))
                    .map(str::trim)
                    .filter(|raw| !raw.is_empty())
                    .filter_map(|raw| ctx.resolve(raw).ok().map(|url| url.path().to_owned()))
                    .collect()
            }
        }
        None => {
            let raw = metadata.scalar("url")?;
            let url = ctx.resolve(raw).ok()?;
            vec![url.path().to_owned()]
        }
    };
    if challenger_pages.is_empty() {
        return None;
    }
    Some((names_for(challenger_pages.len()), challenger_pages))
}

/// Explicit splits from the `split`/`splits` metadata, in percent, assigned to
/// challengers in order. Control always participates in inference.
fn explicit_splits(metadata: &ScopedMetadata, variant_count: usize) -> Vec<Option<f64>> {
    let mut splits = vec![None; variant_count];
    let raw = ["split", "splits"]
        .iter()
        .find_map(|key| metadata.get(key));
    let Some(raw) = raw else {
        return splits;
    };
    let tokens = raw
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|piece| !piece.is_empty());
    for (i, piece) in tokens.enumerate() {
        if i + 1 >= variant_count {
            break;
        }
        // A bad token stays unset so later tokens keep their challenger.
        match piece.parse::<f64>() {
            Ok(percent) => splits[i + 1] = Some(percent / 100.0),
            Err(_) => {
                log::warn!(target: "pagefork", split = piece; "unparseable split, leaving it to inference");
            }
        }
    }
    splits
}

fn build_variants(
    names: &[Slug],
    challenger_pages: &[String],
    splits: &[f64],
    ctx: &RequestContext,
) -> HashMap<Slug, Variant> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let (label, page) = if i == 0 {
                ("Control".to_owned(), ctx.path().to_owned())
            } else {
                (format!("Challenger {i}"), challenger_pages[i - 1].clone())
            };
            let variant = Variant {
                id: name.clone(),
                label,
                percentage_split: format!("{:.2}", splits.get(i).copied().unwrap_or(0.0)),
                pages: vec![page],
            };
            (name.clone(), variant)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::audiences::AudiencePredicate;
    use crate::metadata::VALUE_KEY;

    fn ctx() -> RequestContext {
        RequestContext::parse("https://example.com/products/page?x=1").unwrap()
    }

    fn metadata(entries: &[(&str, &str)]) -> ScopedMetadata {
        let mut md = ScopedMetadata::new(Slug::new("experiment"));
        for (key, value) in entries {
            md.insert(Slug::new(key), (*value).to_owned());
        }
        md
    }

    #[tokio::test]
    async fn instant_experiment_runs_against_current_page() {
        let md = metadata(&[(VALUE_KEY, "my-test"), ("variants", "2")]);
        let config = resolve(&md, &ctx(), &EngineOptions::default()).await.unwrap();
        assert_eq!(config.id, Slug::new("my-test"));
        assert_eq!(
            config.variant_names,
            vec![Slug::new("control"), Slug::new("challenger-1"), Slug::new("challenger-2")]
        );
        assert!(config.run);
        assert_eq!(config.page_for(&Slug::new("challenger-2")), Some("/products/page"));
        assert_eq!(
            config.variants[&Slug::new("control")].percentage_split,
            "0.33"
        );
        let selected = config.selected_variant.as_ref().unwrap();
        assert!(config.variant_names.contains(selected));
    }

    #[tokio::test]
    async fn url_list_variants_resolve_to_paths() {
        let md = metadata(&[
            (VALUE_KEY, "hero"),
            ("variants", "/v1, https://example.com/v2"),
            ("split", "20, 30"),
        ]);
        let config = resolve(&md, &ctx(), &EngineOptions::default()).await.unwrap();
        assert_eq!(config.page_for(&Slug::new("challenger-1")), Some("/v1"));
        assert_eq!(config.page_for(&Slug::new("challenger-2")), Some("/v2"));
        assert_eq!(config.variants[&Slug::new("challenger-1")].percentage_split, "0.20");
        assert_eq!(config.variants[&Slug::new("challenger-2")].percentage_split, "0.30");
        assert_eq!(config.variants[&Slug::new("control")].percentage_split, "0.50");
    }

    #[tokio::test]
    async fn unparseable_split_token_keeps_later_splits_in_place() {
        let md = metadata(&[
            (VALUE_KEY, "hero"),
            ("variants", "3"),
            ("split", "20, oops, 30"),
        ]);
        let config = resolve(&md, &ctx(), &EngineOptions::default()).await.unwrap();
        assert_eq!(config.variants[&Slug::new("challenger-1")].percentage_split, "0.20");
        assert_eq!(config.variants[&Slug::new("challenger-3")].percentage_split, "0.30");
        // The bad token's challenger and control share the remainder.
        assert_eq!(config.variants[&Slug::new("challenger-2")].percentage_split, "0.25");
        assert_eq!(config.variants[&Slug::new("control")].percentage_split, "0.25");
    }

    #[tokio::test]
    async fn missing_id_or_variants_is_inactive() {
        let no_id = metadata(&[("variants", "2")]);
        assert!(resolve(&no_id, &ctx(), &EngineOptions::default()).await.is_none());
        let no_variants = metadata(&[(VALUE_KEY, "my-test")]);
        assert!(resolve(&no_variants, &ctx(), &EngineOptions::default()).await.is_none());
    }

    #[tokio::test]
    async fn failing_audience_prevents_run() {
        let md = metadata(&[(VALUE_KEY, "my-test"), ("variants", "1"), ("audience", "mobile")]);
        let mut options = EngineOptions::default();
        let predicate: Arc<dyn AudiencePredicate> = Arc::new(|| false);
        options.audiences.insert(Slug::new("mobile"), predicate);
        let config = resolve(&md, &ctx(), &options).await.unwrap();
        assert_eq!(config.resolved_audiences, Some(Vec::new()));
        assert!(!config.run);
        assert_eq!(config.selected_variant, None);
    }

    #[tokio::test]
    async fn future_start_date_prevents_run_even_when_active() {
        let md = metadata(&[
            (VALUE_KEY, "my-test"),
            ("variants", "1"),
            ("status", "active"),
            ("start-date", "2999-01-01"),
        ]);
        let config = resolve(&md, &ctx(), &EngineOptions::default()).await.unwrap();
        assert!(!config.run);
    }

    #[tokio::test]
    async fn past_end_date_prevents_run() {
        let md = metadata(&[(VALUE_KEY, "my-test"), ("variants", "1"), ("end-date", "2001-01-01")]);
        let config = resolve(&md, &ctx(), &EngineOptions::default()).await.unwrap();
        assert!(!config.run);
    }

    #[tokio::test]
    async fn inactive_status_prevents_run() {
        let md = metadata(&[(VALUE_KEY, "my-test"), ("variants", "1"), ("status", "archived")]);
        let config = resolve(&md, &ctx(), &EngineOptions::default()).await.unwrap();
        assert!(!config.run);
    }

    #[tokio::test]
    async fn forced_override_selects_and_forces_run() {
        let md = metadata(&[(VALUE_KEY, "my-test"), ("variants", "1"), ("status", "inactive")]);
        let ctx = RequestContext::parse(
            "https://example.com/products/page?experiment=my-test/challenger-1",
        )
        .unwrap();
        let config = resolve(&md, &ctx, &EngineOptions::default()).await.unwrap();
        assert!(config.run, "forced override bypasses status");
        assert_eq!(config.selected_variant, Some(Slug::new("challenger-1")));
    }

    #[tokio::test]
    async fn recorded_assignment_is_reused_across_resolutions() {
        let md = metadata(&[(VALUE_KEY, "my-test"), ("variants", "3")]);
        let options = EngineOptions::default();
        let first = resolve(&md, &ctx(), &options).await.unwrap();
        let second = resolve(&md, &ctx(), &options).await.unwrap();
        assert_eq!(first.selected_variant, second.selected_variant);
    }
}
