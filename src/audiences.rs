//! Visitor segment resolution.
//!
//! An audience is a named boolean predicate over runtime state (device class,
//! cookie consent, referrer, ...). Callers register predicates in
//! [`EngineOptions::audiences`](crate::EngineOptions); configurations name the
//! audiences they target, and the resolver computes the applicable subset.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Slug;

/// A zero-argument boolean predicate defining an audience.
///
/// Predicates may be asynchronous (e.g. consult a device API). Plain closures
/// returning `bool` implement this trait directly.
#[async_trait]
pub trait AudiencePredicate: Send + Sync {
    async fn evaluate(&self) -> bool;
}

#[async_trait]
impl<F> AudiencePredicate for F
where
    F: Fn() -> bool + Send + Sync,
{
    async fn evaluate(&self) -> bool {
        self()
    }
}

/// Registered audience predicates, keyed by audience identifier.
pub type AudienceRegistry = HashMap<Slug, Arc<dyn AudiencePredicate>>;

/// Resolve the applicable subset of `candidates`.
///
/// Returns `None` when there are no candidates or no registered predicates, meaning
/// audience gating is not applicable and content is always shown. A forced audience
/// override short-circuits evaluation: `[forced]` when the forced audience is a
/// candidate, `[]` (content suppressed) when it is not. Otherwise each candidate's
/// predicate is awaited in turn and the truthy subset is returned in input order;
/// candidates without a registered predicate never match.
pub async fn resolve(
    candidates: &[Slug],
    registry: &AudienceRegistry,
    forced: Option<&Slug>,
) -> Option<Vec<Slug>> {
    if candidates.is_empty() || registry.is_empty() {
        return None;
    }
    if let Some(forced) = forced {
        let resolved = if candidates.contains(forced) {
            vec![forced.clone()]
        } else {
            Vec::new()
        };
        log::debug!(target: "pagefork", audience = forced, applicable = !resolved.is_empty(); "forced audience override");
        return Some(resolved);
    }

    let mut resolved = Vec::new();
    for candidate in candidates {
        let Some(predicate) = registry.get(candidate) else {
            continue;
        };
        if predicate.evaluate().await {
            resolved.push(candidate.clone());
        }
    }
    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(entries: &[(&str, bool)]) -> AudienceRegistry {
        entries
            .iter()
            .map(|&(name, value)| {
                let predicate: Arc<dyn AudiencePredicate> = Arc::new(move || value);
                (Slug::new(name), predicate)
            })
            .collect()
    }

    #[tokio::test]
    async fn no_candidates_or_registry_means_not_applicable() {
        let empty = AudienceRegistry::new();
        assert_eq!(resolve(&[], &registry(&[("mobile", true)]), None).await, None);
        assert_eq!(resolve(&[Slug::new("mobile")], &empty, None).await, None);
    }

    #[tokio::test]
    async fn returns_truthy_subset_in_input_order() {
        let registry = registry(&[("mobile", false), ("desktop", true), ("returning", true)]);
        let candidates = [
            Slug::new("returning"),
            Slug::new("mobile"),
            Slug::new("desktop"),
            Slug::new("unregistered"),
        ];
        let resolved = resolve(&candidates, &registry, None).await.unwrap();
        assert_eq!(resolved, vec![Slug::new("returning"), Slug::new("desktop")]);
    }

    #[tokio::test]
    async fn failing_predicate_yields_empty_subset() {
        let registry = registry(&[("mobile", false)]);
        let resolved = resolve(&[Slug::new("mobile")], &registry, None).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn forced_audience_overrides_predicates() {
        let registry = registry(&[("mobile", false), ("desktop", true)]);
        let candidates = [Slug::new("mobile"), Slug::new("desktop")];

        let forced = Slug::new("mobile");
        let resolved = resolve(&candidates, &registry, Some(&forced)).await.unwrap();
        assert_eq!(resolved, vec![Slug::new("mobile")]);

        let alien = Slug::new("tablet");
        let resolved = resolve(&candidates, &registry, Some(&alien)).await.unwrap();
        assert!(resolved.is_empty(), "forced but not applicable suppresses content");
    }
}
