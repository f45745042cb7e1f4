//! Manifest-driven fragment configuration.
//!
//! Externally managed experiments arrive as a JSON manifest enumerating DOM-targeted
//! content overrides. Rows sharing an `experiment` key group into one entry whose
//! urls are that experiment's challenger variants. Each entry is an explicit one-way
//! state machine, `pending -> applied`, driven by [`FragmentWatcher`]: the watcher is
//! polled with the current document, and marking happens within the same synchronous
//! call that detects the selector match, so an entry can never apply twice even when
//! consecutive mutation batches both expose a matching element.

use scraper::Selector;

use crate::dom::{Document, NodeId};
use crate::Slug;

/// A grouped manifest entry: one fragment experiment.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    /// Grouping key; rows without one group under a slug of their selector.
    pub experiment: Slug,
    pub selector_source: String,
    selector: Selector,
    /// Optional path filter; entries for other pages are dropped at parse time.
    pub page: Option<String>,
    /// Challenger content URLs, in row order.
    pub urls: Vec<String>,
    state: EntryState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Pending,
    Applied,
}

impl ManifestEntry {
    pub fn is_applied(&self) -> bool {
        self.state == EntryState::Applied
    }
}

/// A parsed fragment manifest.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Parse a manifest document: `{ "data": [ { selector, url, page?, experiment? } ] }`.
    ///
    /// Keys are case-insensitive. Rows without a selector or url are dropped with a
    /// warning; rows whose `page` does not match `current_path` are dropped silently.
    /// Within a group, scalar fields disagreeing across rows keep the first-seen
    /// value and log a warning.
    pub fn from_value(value: serde_json::Value, current_path: &str) -> Manifest {
        let rows = case_insensitive_get(&value, "data")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut entries: Vec<ManifestEntry> = Vec::new();
        for row in &rows {
            let Some(object) = row.as_object() else {
                log::warn!(target: "pagefork", "manifest row is not an object, skipping");
                continue;
            };
            let field = |name: &str| {
                object
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .and_then(|(_, value)| value.as_str())
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
            };

            let (Some(selector_source), Some(url)) = (field("selector"), field("url")) else {
                log::warn!(target: "pagefork", "manifest row is missing selector or url, skipping");
                continue;
            };
            let page = field("page");
            if page.is_some_and(|page| page != current_path) {
                continue;
            }
            let selector = match Selector::parse(selector_source) {
                Ok(selector) => selector,
                Err(err) => {
                    log::warn!(target: "pagefork", selector = selector_source; "manifest row has an invalid selector, skipping: {err}");
                    continue;
                }
            };
            let experiment = field("experiment")
                .map(Slug::new)
                .filter(|slug| !slug.is_empty())
                .unwrap_or_else(|| Slug::new(selector_source));

            match entries.iter_mut().find(|entry| entry.experiment == experiment) {
                Some(entry) => {
                    if entry.selector_source != selector_source {
                        log::warn!(target: "pagefork", experiment = entry.experiment; "manifest rows disagree on selector, keeping first");
                    }
                    if entry.page.as_deref() != page {
                        log::warn!(target: "pagefork", experiment = entry.experiment; "manifest rows disagree on page, keeping first");
                    }
                    entry.urls.push(url.to_owned());
                }
                None => entries.push(ManifestEntry {
                    experiment,
                    selector_source: selector_source.to_owned(),
                    selector,
                    page: page.map(str::to_owned),
                    urls: vec![url.to_owned()],
                    state: EntryState::Pending,
                }),
            }
        }
        Manifest { entries }
    }
}

fn case_insensitive_get<'a>(
    value: &'a serde_json::Value,
    name: &str,
) -> Option<&'a serde_json::Value> {
    value
        .as_object()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

/// A pending fragment entry whose selector now matches.
#[derive(Debug, Clone)]
pub struct FragmentMatch {
    pub experiment: Slug,
    pub target: NodeId,
    pub urls: Vec<String>,
}

/// Watches for manifest entries whose selectors start matching the document.
///
/// [`FragmentWatcher::take_matches`] is the synchronous check-and-set: an entry
/// transitions to applied in the same call that reports it, and applied entries are
/// never reported again.
#[derive(Debug)]
pub struct FragmentWatcher {
    entries: Vec<ManifestEntry>,
}

impl FragmentWatcher {
    pub fn new(manifest: Manifest) -> FragmentWatcher {
        FragmentWatcher {
            entries: manifest.entries,
        }
    }

    /// All entries have been applied; there is nothing left to watch.
    pub fn is_done(&self) -> bool {
        self.entries.iter().all(ManifestEntry::is_applied)
    }

    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_applied()).count()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Report and mark every still-pending entry whose selector matches `doc`.
    pub fn take_matches(&mut self, doc: &Document) -> Vec<FragmentMatch> {
        let mut matches = Vec::new();
        for entry in &mut self.entries {
            if entry.is_applied() {
                continue;
            }
            let Some(target) = doc.select_first(&entry.selector) else {
                continue;
            };
            entry.state = EntryState::Applied;
            matches.push(FragmentMatch {
                experiment: entry.experiment.clone(),
                target,
                urls: entry.urls.clone(),
            });
        }
        matches
    }
}
