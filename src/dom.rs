//! Page document model.
//!
//! [`Document`] wraps a parsed HTML tree together with an override layer holding the
//! mutations the engine decides on: extra CSS classes and replacement inner content,
//! both keyed by node. The parsed tree itself is never restructured, so node ids stay
//! valid for the whole run and queries always see a consistent snapshot; overrides are
//! applied when the document is serialized back to HTML.

use std::collections::HashMap;
use std::sync::OnceLock;

use scraper::{ElementRef, Html, Node, Selector};

pub use ego_tree::NodeId;
use ego_tree::NodeRef;

/// Elements serialized without a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose text content is parsed raw and must be emitted verbatim,
/// without entity escaping.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "iframe", "noembed", "noframes", "plaintext", "script", "style", "xmp",
];

fn main_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("main").expect("static selector should parse"))
}

#[derive(Debug, Default)]
struct NodeOverride {
    extra_classes: Vec<String>,
    replacement: Option<String>,
}

/// A page with pending modifications.
pub struct Document {
    html: Html,
    overrides: HashMap<NodeId, NodeOverride>,
}

impl Document {
    pub fn parse(source: &str) -> Document {
        Document {
            html: Html::parse_document(source),
            overrides: HashMap::new(),
        }
    }

    /// The underlying parsed tree, for metadata extraction and selector queries.
    pub fn html(&self) -> &Html {
        &self.html
    }

    /// The page's root `<main>` element.
    pub fn main(&self) -> Option<NodeId> {
        self.html.select(main_selector()).next().map(|el| el.id())
    }

    /// The page's sections: element children of `<main>`.
    pub fn sections(&self) -> Vec<NodeId> {
        let Some(main) = self.html.select(main_selector()).next() else {
            return Vec::new();
        };
        main.child_elements().map(|el| el.id()).collect()
    }

    /// The first element matching `selector`.
    pub fn select_first(&self, selector: &Selector) -> Option<NodeId> {
        self.html.select(selector).next().map(|el| el.id())
    }

    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        ElementRef::wrap(self.html.tree.get(id)?)
    }

    /// Append a CSS class to an element. Classes are never removed; appending an
    /// already-present class is a no-op.
    pub fn add_class(&mut self, id: NodeId, class: &str) {
        if self.classes(id).iter().any(|c| c == class) {
            return;
        }
        self.overrides
            .entry(id)
            .or_default()
            .extra_classes
            .push(class.to_owned());
    }

    /// The element's effective classes: parsed classes plus pending additions.
    pub fn classes(&self, id: NodeId) -> Vec<String> {
        let mut classes: Vec<String> = self
            .element(id)
            .map(|el| el.value().classes().map(str::to_owned).collect())
            .unwrap_or_default();
        if let Some(ov) = self.overrides.get(&id) {
            classes.extend(ov.extra_classes.iter().cloned());
        }
        classes
    }

    /// Replace the inner content of an element with pre-serialized HTML.
    ///
    /// `inner_html` must already be sanitized; it is emitted verbatim in place of the
    /// element's children when the document is serialized.
    pub fn replace_inner(&mut self, id: NodeId, inner_html: String) {
        self.overrides.entry(id).or_default().replacement = Some(inner_html);
    }

    pub fn is_replaced(&self, id: NodeId) -> bool {
        self.overrides
            .get(&id)
            .is_some_and(|ov| ov.replacement.is_some())
    }

    /// Serialize the document with all pending modifications applied.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for child in self.html.tree.root().children() {
            write_node(child, &mut out, Some(&self.overrides), false);
        }
        out
    }
}

/// Extract the replacement inner content from a fetched document.
///
/// A page-root target takes the whole `<main>` region; a section target takes the
/// first element child of `<main>`. Script elements are dropped during extraction so
/// spliced content never carries executable code.
pub fn extract_main_inner(fetched: &Html, target_is_main: bool) -> Option<String> {
    let main = fetched.select(main_selector()).next()?;
    let source: NodeRef<'_, Node> = if target_is_main {
        *main
    } else {
        main.children().find(|child| child.value().is_element())?
    };
    let mut out = String::new();
    for child in source.children() {
        write_node(child, &mut out, None, true);
    }
    Some(out)
}

fn write_node(
    node: NodeRef<'_, Node>,
    out: &mut String,
    overrides: Option<&HashMap<NodeId, NodeOverride>>,
    strip_scripts: bool,
) {
    match node.value() {
        Node::Text(text) => escape_text(text, out),
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        Node::Doctype(doctype) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(&doctype.name());
            out.push('>');
        }
        Node::Element(element) => {
            let name = element.name();
            if strip_scripts && name.eq_ignore_ascii_case("script") {
                return;
            }
            let node_override = overrides.and_then(|map| map.get(&node.id()));
            let extra_classes = node_override
                .map(|ov| ov.extra_classes.as_slice())
                .unwrap_or(&[]);

            out.push('<');
            out.push_str(name);
            let mut wrote_class = false;
            for (attr, value) in element.attrs() {
                out.push(' ');
                out.push_str(attr);
                out.push_str("=\"");
                if attr == "class" && !extra_classes.is_empty() {
                    wrote_class = true;
                    escape_attr(&merge_classes(value, extra_classes), out);
                } else {
                    escape_attr(value, out);
                }
                out.push('"');
            }
            if !wrote_class && !extra_classes.is_empty() {
                out.push_str(" class=\"");
                escape_attr(&extra_classes.join(" "), out);
                out.push('"');
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&name) {
                return;
            }
            match node_override.and_then(|ov| ov.replacement.as_deref()) {
                Some(replacement) => out.push_str(replacement),
                None if RAW_TEXT_ELEMENTS.contains(&name) => {
                    for child in node.children() {
                        if let Node::Text(text) = child.value() {
                            out.push_str(text);
                        }
                    }
                }
                None => {
                    for child in node.children() {
                        write_node(child, out, overrides, strip_scripts);
                    }
                }
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        // Document and fragment roots only hold children.
        _ => {
            for child in node.children() {
                write_node(child, out, overrides, strip_scripts);
            }
        }
    }
}

fn merge_classes(existing: &str, extra: &[String]) -> String {
    let mut merged = existing.to_owned();
    for class in extra {
        if !merged.split_whitespace().any(|c| c == class) {
            if !merged.is_empty() {
                merged.push(' ');
            }
            merged.push_str(class);
        }
    }
    merged
}

fn escape_text(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}
