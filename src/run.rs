//! The orchestrator: runs the three scope builders against the page and applies
//! the resulting modifications.
//!
//! Scopes run in a fixed order (audience, experiment, campaign), each at three
//! granularities: the full page (root `<main>`), each section, then — once all
//! scopes have settled — manifest-driven fragments. Section resolutions within one
//! scope run concurrently (content fetches included); DOM application is a
//! synchronous pass afterwards, so concurrent resolutions never contend on the
//! document.

use futures::future::join_all;

use crate::config::{audience, campaign, experiment};
use crate::config::{AudienceConfig, CampaignConfig, ExperimentConfig};
use crate::context::RequestContext;
use crate::dom::{Document, NodeId};
use crate::fetch::FragmentFetcher;
use crate::manifest::{FragmentMatch, FragmentWatcher};
use crate::metadata;
use crate::options::{EngineOptions, TrackEvent};
use crate::Slug;

/// Everything a page run resolved, returned from the entry point so diagnostics
/// can inspect it. No global state is written.
pub struct RunOutcome {
    pub audience: Option<AudienceConfig>,
    pub experiment: Option<ExperimentConfig>,
    pub campaign: Option<CampaignConfig>,
    pub section_audiences: Vec<AudienceConfig>,
    pub section_experiments: Vec<ExperimentConfig>,
    pub section_campaigns: Vec<CampaignConfig>,
    /// Watcher for manifest entries still pending after the initial poll. Feed it
    /// to [`Engine::watch_fragments`] as the host keeps mutating the page.
    pub fragments: Option<FragmentWatcher>,
    /// Sampling rate the caller's telemetry should apply to this page.
    pub rum_sampling_rate: u32,
}

impl RunOutcome {
    /// Whether any experiment is running on this page.
    pub fn is_experimented(&self) -> bool {
        self.experiment.as_ref().is_some_and(|e| e.run)
            || self.section_experiments.iter().any(|e| e.run)
    }
}

/// The outcome of planning one content serve, resolved before touching the page.
enum ServePlan {
    /// The content URL points at the current page; nothing to fetch.
    Current(String),
    /// Alternate content, fetched and extracted, ready to splice.
    Fetched { path: String, inner: String },
    Failed,
}

/// The experimentation engine.
///
/// One engine serves one page run; the default assignment store keeps variant
/// selections consistent across that run's resolutions.
pub struct Engine {
    options: EngineOptions,
    fetcher: FragmentFetcher,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Engine {
        Engine {
            options,
            fetcher: FragmentFetcher::new(),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Resolve and apply all configured modifications to `doc`.
    pub async fn apply_modifications(
        &self,
        doc: &mut Document,
        ctx: &RequestContext,
    ) -> RunOutcome {
        if ctx.is_debug_enabled() {
            log::debug!(target: "pagefork", path = ctx.path(); "experimentation debug enabled for this request");
        }

        let audience = self.run_audience_page(doc, ctx).await;
        let section_audiences = self.run_audience_sections(doc, ctx).await;
        let experiment = self.run_experiment_page(doc, ctx).await;
        let section_experiments = self.run_experiment_sections(doc, ctx).await;
        let campaign = self.run_campaign_page(doc, ctx).await;
        let section_campaigns = self.run_campaign_sections(doc, ctx).await;
        let fragments = self.start_fragment_watch(doc, ctx).await;

        RunOutcome {
            audience,
            experiment,
            campaign,
            section_audiences,
            section_experiments,
            section_campaigns,
            fragments,
            rum_sampling_rate: self.options.rum_sampling_rate,
        }
    }

    // --- serving ---

    /// Plan a content serve without touching the document. Fetch failures degrade
    /// to [`ServePlan::Failed`] with a warning; they never surface as errors.
    async fn plan_serve(
        &self,
        ctx: &RequestContext,
        raw_url: &str,
        target_is_main: bool,
    ) -> ServePlan {
        let url = match ctx.resolve(raw_url) {
            Ok(url) => url,
            Err(err) => {
                log::warn!(target: "pagefork", url = raw_url; "invalid content url: {err}");
                return ServePlan::Failed;
            }
        };
        if url.path() == ctx.path() {
            return ServePlan::Current(url.path().to_owned());
        }
        match self.fetcher.fetch_replacement(&url, target_is_main).await {
            Some(inner) => ServePlan::Fetched {
                path: url.path().to_owned(),
                inner,
            },
            None => ServePlan::Failed,
        }
    }

    /// Apply a planned serve, returning the path of the content actually served.
    fn apply_plan(&self, doc: &mut Document, target: NodeId, plan: ServePlan) -> Option<String> {
        match plan {
            ServePlan::Current(path) => Some(path),
            ServePlan::Fetched { path, inner } => {
                doc.replace_inner(target, inner);
                if let Some(decorate) = &self.options.decorate_function {
                    decorate(doc, target);
                }
                Some(path)
            }
            ServePlan::Failed => None,
        }
    }

    /// Page-level metadata for `scope`: document `<meta>` tags supplemented by query
    /// parameters. The scope's own query parameter is the forcing override and never
    /// contributes configuration; document keys take precedence over query keys.
    fn page_metadata(
        &self,
        doc: &Document,
        ctx: &RequestContext,
        scope: &Slug,
    ) -> metadata::ScopedMetadata {
        let mut md = metadata::document_metadata(doc.html(), scope);
        let from_query = metadata::query_metadata(ctx.url(), scope);
        for (key, value) in from_query.entries() {
            if key.as_str() == metadata::VALUE_KEY || md.get(key.as_str()).is_some() {
                continue;
            }
            for piece in value.iter() {
                md.insert(key.clone(), piece.to_owned());
            }
        }
        md
    }

    fn track(&self, event: &str, source: &str, target: &str) {
        log::debug!(target: "pagefork", event, source, dest = target; "modification tracked");
        if let Some(tracking) = &self.options.tracking_function {
            let payload = TrackEvent {
                source: source.to_owned(),
                target: target.to_owned(),
            };
            tracking(event, &payload);
        }
    }

    // --- audience scope ---

    async fn run_audience_page(
        &self,
        doc: &mut Document,
        ctx: &RequestContext,
    ) -> Option<AudienceConfig> {
        let scope = Slug::new(&self.options.audiences_meta_tag_prefix);
        let md = self.page_metadata(doc, ctx, &scope);
        let config = audience::resolve(&md, ctx, &self.options).await?;
        let target = doc.main()?;
        let plan = match config.selected_url().map(str::to_owned) {
            Some(url) => Some(self.plan_serve(ctx, &url, true).await),
            None => None,
        };
        Some(self.finish_audience(doc, ctx, target, config, plan))
    }

    async fn run_audience_sections(
        &self,
        doc: &mut Document,
        ctx: &RequestContext,
    ) -> Vec<AudienceConfig> {
        let section_ids = doc.sections();
        if section_ids.is_empty() {
            return Vec::new();
        }
        let scope = Slug::new(&self.options.audiences_meta_tag_prefix);
        let doc_ref: &Document = &*doc;
        let work = join_all(section_ids.into_iter().map(|id| {
            let scope = scope.clone();
            async move {
                let element = doc_ref.element(id)?;
                let md = metadata::section_metadata(element, &scope);
                if md.is_empty() {
                    return None;
                }
                let config = audience::resolve(&md, ctx, &self.options).await?;
                let plan = match config.selected_url().map(str::to_owned) {
                    Some(url) => Some(self.plan_serve(ctx, &url, false).await),
                    None => None,
                };
                Some((id, config, plan))
            }
        }))
        .await;
        work.into_iter()
            .flatten()
            .map(|(id, config, plan)| self.finish_audience(doc, ctx, id, config, plan))
            .collect()
    }

    fn finish_audience(
        &self,
        doc: &mut Document,
        ctx: &RequestContext,
        target: NodeId,
        config: AudienceConfig,
        plan: Option<ServePlan>,
    ) -> AudienceConfig {
        let prefix = &self.options.audiences_meta_tag_prefix;
        let Some(selected) = config.selected_audience.clone() else {
            return config;
        };
        match plan.and_then(|plan| self.apply_plan(doc, target, plan)) {
            Some(path) => {
                doc.add_class(target, &format!("{prefix}-{selected}"));
                self.track("audience", selected.as_str(), &path);
            }
            None => {
                doc.add_class(target, &format!("{prefix}-default"));
                self.track("audience", "default", ctx.path());
            }
        }
        config
    }

    // --- experiment scope ---

    async fn run_experiment_page(
        &self,
        doc: &mut Document,
        ctx: &RequestContext,
    ) -> Option<ExperimentConfig> {
        let scope = Slug::new(&self.options.experiments_meta_tag);
        let md = self.page_metadata(doc, ctx, &scope);
        let config = experiment::resolve(&md, ctx, &self.options).await?;
        let target = doc.main()?;
        let plan = self.plan_experiment_serve(ctx, &config, true).await;
        Some(self.finish_experiment(doc, target, config, plan))
    }

    async fn run_experiment_sections(
        &self,
        doc: &mut Document,
        ctx: &RequestContext,
    ) -> Vec<ExperimentConfig> {
        let section_ids = doc.sections();
        if section_ids.is_empty() {
            return Vec::new();
        }
        let scope = Slug::new(&self.options.experiments_meta_tag);
        let doc_ref: &Document = &*doc;
        let work = join_all(section_ids.into_iter().map(|id| {
            let scope = scope.clone();
            async move {
                let element = doc_ref.element(id)?;
                let md = metadata::section_metadata(element, &scope);
                if md.is_empty() {
                    return None;
                }
                let config = experiment::resolve(&md, ctx, &self.options).await?;
                let plan = self.plan_experiment_serve(ctx, &config, false).await;
                Some((id, config, plan))
            }
        }))
        .await;
        work.into_iter()
            .flatten()
            .map(|(id, config, plan)| self.finish_experiment(doc, id, config, plan))
            .collect()
    }

    async fn plan_experiment_serve(
        &self,
        ctx: &RequestContext,
        config: &ExperimentConfig,
        target_is_main: bool,
    ) -> Option<ServePlan> {
        if !config.run {
            return None;
        }
        let page = config
            .selected_variant
            .as_ref()
            .and_then(|variant| config.page_for(variant))
            .map(str::to_owned)?;
        Some(self.plan_serve(ctx, &page, target_is_main).await)
    }

    fn finish_experiment(
        &self,
        doc: &mut Document,
        target: NodeId,
        config: ExperimentConfig,
        plan: Option<ServePlan>,
    ) -> ExperimentConfig {
        if !config.run {
            return config;
        }
        let Some(selected) = config.selected_variant.clone() else {
            return config;
        };
        let served = plan.and_then(|plan| self.apply_plan(doc, target, plan));
        // A failed challenger fetch leaves the control content standing.
        let actual = if served.is_some() {
            selected
        } else {
            config
                .variant_names
                .first()
                .cloned()
                .unwrap_or_else(|| Slug::new(experiment::CONTROL))
        };
        let prefix = &self.options.experiments_meta_tag;
        doc.add_class(target, &format!("{prefix}-{}", config.id));
        doc.add_class(target, &format!("variant-{actual}"));
        self.track("experiment", config.id.as_str(), actual.as_str());
        config
    }

    // --- campaign scope ---

    async fn run_campaign_page(
        &self,
        doc: &mut Document,
        ctx: &RequestContext,
    ) -> Option<CampaignConfig> {
        let scope = Slug::new(&self.options.campaigns_meta_tag_prefix);
        let md = self.page_metadata(doc, ctx, &scope);
        let config = campaign::resolve(&md, ctx, &self.options).await?;
        let target = doc.main()?;
        let plan = match config.selected_url().map(str::to_owned) {
            Some(url) => Some(self.plan_serve(ctx, &url, true).await),
            None => None,
        };
        Some(self.finish_campaign(doc, ctx, target, config, plan))
    }

    async fn run_campaign_sections(
        &self,
        doc: &mut Document,
        ctx: &RequestContext,
    ) -> Vec<CampaignConfig> {
        let section_ids = doc.sections();
        if section_ids.is_empty() {
            return Vec::new();
        }
        let scope = Slug::new(&self.options.campaigns_meta_tag_prefix);
        let doc_ref: &Document = &*doc;
        let work = join_all(section_ids.into_iter().map(|id| {
            let scope = scope.clone();
            async move {
                let element = doc_ref.element(id)?;
                let md = metadata::section_metadata(element, &scope);
                if md.is_empty() {
                    return None;
                }
                let config = campaign::resolve(&md, ctx, &self.options).await?;
                let plan = match config.selected_url().map(str::to_owned) {
                    Some(url) => Some(self.plan_serve(ctx, &url, false).await),
                    None => None,
                };
                Some((id, config, plan))
            }
        }))
        .await;
        work.into_iter()
            .flatten()
            .map(|(id, config, plan)| self.finish_campaign(doc, ctx, id, config, plan))
            .collect()
    }

    fn finish_campaign(
        &self,
        doc: &mut Document,
        ctx: &RequestContext,
        target: NodeId,
        config: CampaignConfig,
        plan: Option<ServePlan>,
    ) -> CampaignConfig {
        let prefix = &self.options.campaigns_meta_tag_prefix;
        let Some(selected) = config.selected_campaign.clone() else {
            return config;
        };
        match plan.and_then(|plan| self.apply_plan(doc, target, plan)) {
            Some(path) => {
                doc.add_class(target, &format!("{prefix}-{selected}"));
                self.track("campaign", selected.as_str(), &path);
            }
            None => {
                doc.add_class(target, &format!("{prefix}-default"));
                self.track("campaign", "default", ctx.path());
            }
        }
        config
    }

    // --- manifest-driven fragments ---

    async fn start_fragment_watch(
        &self,
        doc: &mut Document,
        ctx: &RequestContext,
    ) -> Option<FragmentWatcher> {
        if self.options.experiments_config_file.is_empty() {
            return None;
        }
        let manifest_path = format!(
            "{}/{}",
            self.options.experiments_root.trim_end_matches('/'),
            self.options.experiments_config_file
        );
        let url = match ctx.resolve(&manifest_path) {
            Ok(url) => url,
            Err(err) => {
                log::warn!(target: "pagefork", url = manifest_path.as_str(); "invalid manifest url: {err}");
                return None;
            }
        };
        let manifest = match self.fetcher.fetch_manifest(&url, ctx.path()).await {
            Ok(manifest) => manifest,
            Err(err) => {
                log::warn!(target: "pagefork", url:display = url; "failed to load fragment manifest, treating as empty: {err}");
                return None;
            }
        };
        if manifest.entries.is_empty() {
            return None;
        }
        let mut watcher = FragmentWatcher::new(manifest);
        self.poll_fragments(doc, ctx, &mut watcher).await;
        Some(watcher)
    }

    /// Apply every pending manifest entry whose selector currently matches `doc`.
    pub async fn poll_fragments(
        &self,
        doc: &mut Document,
        ctx: &RequestContext,
        watcher: &mut FragmentWatcher,
    ) {
        for matched in watcher.take_matches(doc) {
            self.apply_fragment(doc, ctx, matched).await;
        }
    }

    /// Keep applying manifest entries as the host mutates the page.
    ///
    /// `mutations` is a generation counter bumped by the host after each mutation
    /// batch. The loop ends when every entry is applied or the sender side of the
    /// subscription is dropped.
    pub async fn watch_fragments(
        &self,
        doc: &mut Document,
        ctx: &RequestContext,
        watcher: &mut FragmentWatcher,
        mutations: &mut tokio::sync::watch::Receiver<u64>,
    ) {
        while !watcher.is_done() {
            if mutations.changed().await.is_err() {
                log::debug!(target: "pagefork", pending = watcher.pending(); "fragment watch subscription cancelled");
                break;
            }
            self.poll_fragments(doc, ctx, watcher).await;
        }
    }

    async fn apply_fragment(&self, doc: &mut Document, ctx: &RequestContext, matched: FragmentMatch) {
        let Some(config) =
            experiment::resolve_fragment(&matched.experiment, &matched.urls, ctx, &self.options)
        else {
            return;
        };
        let Some(selected) = config.selected_variant.clone() else {
            return;
        };
        let is_control = config.variant_names.first() == Some(&selected);
        let served = if is_control {
            // Control keeps the fragment already on the page.
            Some(ctx.path().to_owned())
        } else {
            match config.page_for(&selected).map(str::to_owned) {
                Some(page) => {
                    let target_is_main = doc
                        .element(matched.target)
                        .is_some_and(|el| el.value().name().eq_ignore_ascii_case("main"));
                    let plan = self.plan_serve(ctx, &page, target_is_main).await;
                    self.apply_plan(doc, matched.target, plan)
                }
                None => None,
            }
        };
        let actual = if served.is_some() {
            selected
        } else {
            config
                .variant_names
                .first()
                .cloned()
                .unwrap_or_else(|| Slug::new(experiment::CONTROL))
        };
        let prefix = &self.options.experiments_meta_tag;
        doc.add_class(matched.target, &format!("{prefix}-{}", config.id));
        doc.add_class(matched.target, &format!("variant-{actual}"));
        self.track("experiment", config.id.as_str(), actual.as_str());
    }
}
