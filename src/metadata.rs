//! Scoped key/value configuration extracted from the page and the request.
//!
//! Three producers share one output shape: document-level `<meta>` tags, per-section
//! metadata blocks, and URL query parameters. The config builders treat all three
//! uniformly, so the key-naming semantics must be identical across producers.

use std::collections::HashMap;
use std::sync::OnceLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::Slug;

/// Key under which a scope's own unqualified value is stored, e.g. the content of
/// `<meta name="experiment">` or the value of `?campaign=...`.
pub const VALUE_KEY: &str = "value";

/// A scalar or an ordered sequence of strings.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::From)]
pub enum MetadataValue {
    One(String),
    Many(Vec<String>),
}

impl MetadataValue {
    /// The value as a scalar; for sequences, the first element.
    pub fn as_scalar(&self) -> &str {
        match self {
            MetadataValue::One(v) => v,
            MetadataValue::Many(vs) => vs.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// Iterate over all values in order of appearance.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            MetadataValue::One(v) => std::slice::from_ref(v).iter().map(String::as_str),
            MetadataValue::Many(vs) => vs.as_slice().iter().map(String::as_str),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            MetadataValue::One(first) => {
                *self = MetadataValue::Many(vec![std::mem::take(first), value]);
            }
            MetadataValue::Many(vs) => vs.push(value),
        }
    }
}

/// A mapping from normalized keys to values for one scope (e.g. "experiment").
///
/// Keys preserve their order of first appearance so that "first configured" and
/// "first resolved" semantics are well-defined.
#[derive(Debug, Clone, Default)]
pub struct ScopedMetadata {
    scope: Slug,
    entries: HashMap<Slug, MetadataValue>,
    order: Vec<Slug>,
}

impl ScopedMetadata {
    pub fn new(scope: Slug) -> ScopedMetadata {
        ScopedMetadata {
            scope,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn scope(&self) -> &Slug {
        &self.scope
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(&Slug::new(key))
    }

    /// The value for `key` as a scalar.
    pub fn scalar(&self, key: &str) -> Option<&str> {
        self.get(key).map(MetadataValue::as_scalar)
    }

    /// The scope's own unqualified value, if present.
    pub fn own_value(&self) -> Option<&str> {
        self.scalar(VALUE_KEY)
    }

    /// Keys in order of first appearance.
    pub fn keys(&self) -> impl Iterator<Item = &Slug> {
        self.order.iter()
    }

    /// Entries in order of first appearance.
    pub fn entries(&self) -> impl Iterator<Item = (&Slug, &MetadataValue)> {
        self.order.iter().filter_map(|k| self.entries.get_key_value(k))
    }

    /// Insert a value, accumulating repeated keys into an ordered sequence.
    pub fn insert(&mut self, key: Slug, value: String) {
        match self.entries.get_mut(&key) {
            Some(existing) => existing.push(value),
            None => {
                self.order.push(key.clone());
                self.entries.insert(key, MetadataValue::One(value));
            }
        }
    }
}

/// Map a raw metadata name onto a key within `scope`.
///
/// Names normalize before matching, so `<scope>:<key>` properties and `<scope>-<key>`
/// names land on the same key. A name equal to the scope itself maps to [`VALUE_KEY`].
fn scoped_key(scope: &Slug, raw: &str) -> Option<Slug> {
    let name = Slug::new(raw);
    if name == *scope {
        return Some(Slug::new(VALUE_KEY));
    }
    let suffix = name.as_str().strip_prefix(scope.as_str())?;
    let suffix = suffix.strip_prefix('-')?;
    if suffix.is_empty() {
        None
    } else {
        Some(Slug::new(suffix))
    }
}

fn meta_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| {
        Selector::parse("meta[name], meta[property]").expect("static selector should parse")
    })
}

fn section_block_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse(".section-metadata").expect("static selector should parse"))
}

/// Extract document-scope metadata from global `<meta>` tags.
///
/// Matches `<meta name="<scope>-*">` and `<meta property="<scope>:*">`, plus the
/// scope's own tag (`<meta name="<scope>">`) which lands under [`VALUE_KEY`].
pub fn document_metadata(html: &Html, scope: &Slug) -> ScopedMetadata {
    let mut metadata = ScopedMetadata::new(scope.clone());
    for element in html.select(meta_selector()) {
        let raw_name = element
            .value()
            .attr("name")
            .or_else(|| element.value().attr("property"));
        let (Some(raw_name), Some(content)) = (raw_name, element.value().attr("content")) else {
            continue;
        };
        if let Some(key) = scoped_key(scope, raw_name) {
            metadata.insert(key, content.trim().to_owned());
        }
    }
    metadata
}

/// Extract section-scope metadata from a section's metadata block.
///
/// Rows are the two-column children of a `.section-metadata` block; the first cell's
/// normalized text is the key, and the second cell contributes values by content type
/// precedence: link hrefs, then image srcs, then paragraph texts, then raw text.
pub fn section_metadata(section: ElementRef<'_>, scope: &Slug) -> ScopedMetadata {
    let mut metadata = ScopedMetadata::new(scope.clone());
    let Some(block) = section.select(section_block_selector()).next() else {
        return metadata;
    };
    for row in block.child_elements() {
        let cells: Vec<ElementRef> = row.child_elements().collect();
        let [key_cell, value_cell] = cells.as_slice() else {
            continue;
        };
        let raw_key: String = key_cell.text().collect();
        let Some(key) = scoped_key(scope, raw_key.trim()) else {
            continue;
        };
        for value in cell_values(*value_cell) {
            metadata.insert(key.clone(), value);
        }
    }
    metadata
}

fn cell_values(cell: ElementRef<'_>) -> Vec<String> {
    fn select_all(cell: ElementRef<'_>, selector: &Selector, attr: Option<&str>) -> Vec<String> {
        cell.select(selector)
            .filter_map(|el| match attr {
                Some(attr) => el.value().attr(attr).map(|v| v.trim().to_owned()),
                None => {
                    let text: String = el.text().collect();
                    let text = text.trim().to_owned();
                    (!text.is_empty()).then_some(text)
                }
            })
            .collect()
    }

    static LINKS: OnceLock<Selector> = OnceLock::new();
    static IMAGES: OnceLock<Selector> = OnceLock::new();
    static PARAGRAPHS: OnceLock<Selector> = OnceLock::new();
    let links = LINKS.get_or_init(|| Selector::parse("a[href]").expect("static selector should parse"));
    let images = IMAGES.get_or_init(|| Selector::parse("img[src]").expect("static selector should parse"));
    let paragraphs = PARAGRAPHS.get_or_init(|| Selector::parse("p").expect("static selector should parse"));

    let hrefs = select_all(cell, links, Some("href"));
    if !hrefs.is_empty() {
        return hrefs;
    }
    let srcs = select_all(cell, images, Some("src"));
    if !srcs.is_empty() {
        return srcs;
    }
    let texts = select_all(cell, paragraphs, None);
    if !texts.is_empty() {
        return texts;
    }
    let raw: String = cell.text().collect();
    let raw = raw.trim().to_owned();
    if raw.is_empty() {
        Vec::new()
    } else {
        vec![raw]
    }
}

/// Extract scope metadata from the request's query string.
///
/// Repeated parameters accumulate into a sequence preserving order of appearance.
pub fn query_metadata(url: &Url, scope: &Slug) -> ScopedMetadata {
    let mut metadata = ScopedMetadata::new(scope.clone());
    for (name, value) in url.query_pairs() {
        if let Some(key) = scoped_key(scope, &name) {
            metadata.insert(key, value.into_owned());
        }
    }
    metadata
}

#[cfg(test)]
mod tests {
    use scraper::{Html, Selector};
    use url::Url;

    use super::*;

    fn scope() -> Slug {
        Slug::new("experiment")
    }

    #[test]
    fn document_metadata_matches_name_and_property() {
        let html = Html::parse_document(
            r#"<html><head>
                <meta name="experiment" content="my-test">
                <meta name="experiment-variants" content="2">
                <meta property="experiment:audience" content="Mobile, Desktop">
                <meta name="campaign-ignored" content="nope">
            </head><body></body></html>"#,
        );
        let md = document_metadata(&html, &scope());
        assert_eq!(md.own_value(), Some("my-test"));
        assert_eq!(md.scalar("variants"), Some("2"));
        assert_eq!(md.scalar("audience"), Some("Mobile, Desktop"));
        assert!(md.get("ignored").is_none());
    }

    #[test]
    fn section_metadata_honors_content_precedence() {
        let html = Html::parse_document(
            r#"<main><div>
              <div class="section-metadata">
                <div><div>Experiment</div><div><p>hero-test</p></div></div>
                <div><div>Experiment Variants</div><div>
                  <a href="/v1">one</a><a href="/v2">two</a><p>shadowed</p>
                </div></div>
                <div><div>Experiment Split</div><div>40</div></div>
                <div><div>single column</div></div>
              </div>
            </div></main>"#,
        );
        let section = html
            .select(&Selector::parse("main > div").unwrap())
            .next()
            .unwrap();
        let md = section_metadata(section, &scope());
        assert_eq!(md.own_value(), Some("hero-test"));
        assert_eq!(
            md.get("variants").unwrap().iter().collect::<Vec<_>>(),
            vec!["/v1", "/v2"]
        );
        assert_eq!(md.scalar("split"), Some("40"));
    }

    #[test]
    fn query_metadata_accumulates_repeats_in_order() {
        let url =
            Url::parse("https://example.com/?experiment=a&experiment-split=10&experiment=b&other=x")
                .unwrap();
        let md = query_metadata(&url, &scope());
        assert_eq!(
            md.get(VALUE_KEY).unwrap().iter().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(md.scalar("split"), Some("10"));
        assert!(md.get("other").is_none());
    }

    #[test]
    fn producers_agree_on_key_semantics() {
        let html = Html::parse_document(
            r#"<head><meta name="experiment-start-date" content="2024-01-01"></head>"#,
        );
        let from_doc = document_metadata(&html, &scope());
        let url = Url::parse("https://example.com/?experiment-start-date=2024-01-01").unwrap();
        let from_query = query_metadata(&url, &scope());
        assert_eq!(from_doc.scalar("start-date"), from_query.scalar("start-date"));
    }
}
