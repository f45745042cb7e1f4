//! `pagefork` is a server-side experimentation and personalization engine for
//! HTML pages.
//!
//! The engine reads its configuration out of the page itself — `<meta>` tags,
//! per-section metadata blocks and query parameters — and rewrites the page
//! accordingly: splicing in alternate content, marking modified regions with CSS
//! classes and reporting what it decided through a tracking callback. Three scopes
//! are supported:
//!
//! - **Experiments** bucket traffic into a control and one or more challengers by
//!   weighted random draw, gated on status, schedule and audiences.
//! - **Campaigns** serve campaign-specific content when the campaign query
//!   parameter (or `utm_campaign`) names a configured campaign.
//! - **Audiences** serve audience-specific content to the first applicable
//!   audience, as decided by caller-registered predicates.
//!
//! Externally managed fragment experiments arrive through a JSON manifest and are
//! applied exactly once as their target elements appear, driven by a mutation
//! generation counter supplied by the host.
//!
//! # Example
//! ```no_run
//! # async fn example() -> pagefork::Result<()> {
//! use pagefork::{dom::Document, Engine, EngineOptions, RequestContext};
//!
//! let options = EngineOptions::default()
//!     .with_audience("mobile", || false)
//!     .with_tracking_function(|event, data| {
//!         println!("{event}: {} -> {}", data.source, data.target);
//!     });
//! let engine = Engine::new(options);
//!
//! let mut doc = Document::parse("<html>...</html>");
//! let ctx = RequestContext::parse("https://example.com/products/page")?;
//! let outcome = engine.apply_modifications(&mut doc, &ctx).await;
//! println!("{}", doc.to_html());
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```
#![warn(rustdoc::missing_crate_level_docs)]

pub mod audiences;
pub mod config;
pub mod decision;
pub mod dom;
pub mod fetch;
pub mod manifest;
pub mod metadata;

mod context;
mod error;
mod options;
mod run;
mod slug;

pub use context::RequestContext;
pub use decision::{AssignmentStore, InMemoryAssignmentStore, NoopAssignmentStore};
pub use error::{Error, Result};
pub use options::{DecorateFunction, EngineOptions, TrackEvent, TrackingFunction};
pub use run::{Engine, RunOutcome};
pub use slug::Slug;
