//! Engine configuration.

use std::sync::Arc;

use crate::audiences::{AudiencePredicate, AudienceRegistry};
use crate::decision::{AssignmentStore, InMemoryAssignmentStore};
use crate::dom::{Document, NodeId};
use crate::Slug;

/// Payload of a tracking callback invocation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TrackEvent {
    /// What was resolved (experiment/campaign/audience id).
    pub source: String,
    /// What was served (variant id or content path).
    pub target: String,
}

/// Caller-supplied tracking callback, invoked as `(event_name, event)` for each of
/// `audience`, `campaign` and `experiment`.
pub type TrackingFunction = Arc<dyn Fn(&str, &TrackEvent) + Send + Sync>;

/// Caller-supplied callback invoked for each element whose content was spliced, so
/// the caller can re-decorate the new content.
pub type DecorateFunction = Arc<dyn Fn(&mut Document, NodeId) + Send + Sync>;

/// Options recognized by every entry point.
///
/// # Examples
/// ```
/// # use pagefork::EngineOptions;
/// let options = EngineOptions::default()
///     .with_audience("mobile", || false)
///     .with_tracking_function(|event, data| {
///         println!("{event}: {} -> {}", data.source, data.target);
///     });
/// ```
pub struct EngineOptions {
    /// Invoked per spliced element so the caller can re-decorate its content.
    pub decorate_function: Option<DecorateFunction>,
    /// Sampling rate the caller's telemetry should use on experimented pages.
    /// Surfaced in the run outcome; the engine itself does not sample.
    pub rum_sampling_rate: u32,
    pub tracking_function: Option<TrackingFunction>,
    /// Registered audience predicates.
    pub audiences: AudienceRegistry,
    pub audiences_meta_tag_prefix: String,
    pub audiences_query_parameter: String,
    pub campaigns_meta_tag_prefix: String,
    pub campaigns_query_parameter: String,
    /// Root path under which fragment experiment content and the manifest live.
    pub experiments_root: String,
    /// Manifest file name under [`EngineOptions::experiments_root`]. Empty disables
    /// manifest-driven fragments.
    pub experiments_config_file: String,
    pub experiments_meta_tag: String,
    pub experiments_query_parameter: String,
    /// Assignment stickiness policy. The default in-memory store keeps a single
    /// engine self-consistent; it is not persisted across requests.
    pub assignment_store: Arc<dyn AssignmentStore>,
}

impl EngineOptions {
    /// Default sampling rate reported for experimented pages.
    pub const DEFAULT_RUM_SAMPLING_RATE: u32 = 10;

    pub fn with_tracking_function(
        mut self,
        tracking: impl Fn(&str, &TrackEvent) + Send + Sync + 'static,
    ) -> EngineOptions {
        self.tracking_function = Some(Arc::new(tracking));
        self
    }

    pub fn with_decorate_function(
        mut self,
        decorate: impl Fn(&mut Document, NodeId) + Send + Sync + 'static,
    ) -> EngineOptions {
        self.decorate_function = Some(Arc::new(decorate));
        self
    }

    /// Register an audience predicate.
    pub fn with_audience(
        mut self,
        name: &str,
        predicate: impl AudiencePredicate + 'static,
    ) -> EngineOptions {
        self.audiences.insert(Slug::new(name), Arc::new(predicate));
        self
    }

    pub fn with_rum_sampling_rate(mut self, rate: u32) -> EngineOptions {
        self.rum_sampling_rate = rate;
        self
    }

    pub fn with_experiments_root(mut self, root: impl Into<String>) -> EngineOptions {
        self.experiments_root = root.into();
        self
    }

    pub fn with_experiments_config_file(mut self, file: impl Into<String>) -> EngineOptions {
        self.experiments_config_file = file.into();
        self
    }

    pub fn with_assignment_store(mut self, store: impl AssignmentStore + 'static) -> EngineOptions {
        self.assignment_store = Arc::new(store);
        self
    }
}

impl Default for EngineOptions {
    fn default() -> EngineOptions {
        EngineOptions {
            decorate_function: None,
            rum_sampling_rate: EngineOptions::DEFAULT_RUM_SAMPLING_RATE,
            tracking_function: None,
            audiences: AudienceRegistry::new(),
            audiences_meta_tag_prefix: "audience".to_owned(),
            audiences_query_parameter: "audience".to_owned(),
            campaigns_meta_tag_prefix: "campaign".to_owned(),
            campaigns_query_parameter: "campaign".to_owned(),
            experiments_root: "/experiments".to_owned(),
            experiments_config_file: "manifest.json".to_owned(),
            experiments_meta_tag: "experiment".to_owned(),
            experiments_query_parameter: "experiment".to_owned(),
            assignment_store: Arc::new(InMemoryAssignmentStore::default()),
        }
    }
}
