//! Sync configuration
//!
//! [`SyncConfig`] is the TOML document an operator writes. It is validated
//! and compiled once into a [`SyncPlan`], which owns everything a run needs:
//! codec, preprocessor chain, grouping engine, comment selector, open
//! predicate and transition policy.
//!
//! ```toml
//! tracker_name = "JIRA"
//! page_size = 50
//!
//! [grouping]
//! key = "${application}:${release}"
//!
//! [state]
//! open = { op = "not", condition = { op = "is_true", value = "${removed}" } }
//!
//! [[fields]]
//! name = "summary"
//! value = "${@size} vulnerabilities in ${@key}"
//! required = true
//!
//! [[preprocess]]
//! kind = "filter"
//! name = "suppressed"
//! mode = "exclude"
//! condition = { op = "is_true", value = "${suppressed}" }
//! ```

use crate::error::ConfigError;
use crate::group::{FieldMapping, GroupingEngine};
use bugsync_locator::{LocatorCodec, DEFAULT_TEMPLATE};
use bugsync_pipeline::{
    CommentSelector, ConditionFilter, LocatorEnricher, MatchMode, OnDemandEnricher,
    PreprocessorChain, SetFieldEnricher, Stage, StateEnricher, TracingObserver, DEFAULT_PAGE_SIZE,
};
use bugsync_record::{Condition, Expression, FieldPath, ResourceFetcher};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_REOPEN_COMMENT: &str = "Issue re-opened based on source vulnerability state";
const DEFAULT_CLOSE_COMMENT: &str =
    "Issue closed as all related vulnerabilities were fixed or removed";
const DEFAULT_LINK_COMMENT: &str = "New related vulnerabilities were linked to this issue";

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn default_true() -> bool {
    true
}

/// Top-level sync configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Tracker name, substituted for `{tracker}` in locator comments
    pub tracker_name: String,
    /// Records per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Locator comment template
    #[serde(default = "default_template")]
    pub comment_template: String,
    /// Grouping settings
    pub grouping: GroupingConfig,
    /// Where records keep their comments
    #[serde(default)]
    pub comments: CommentsConfig,
    /// Vulnerability state and transition policy
    #[serde(default)]
    pub state: StateConfig,
    /// Issue field mappings
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
    /// Preprocessor stages in order
    #[serde(default)]
    pub preprocess: Vec<PreprocessConfig>,
    /// Field used to identify records in filter logs
    #[serde(default)]
    pub record_id_field: Option<String>,
}

/// `[grouping]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupingConfig {
    /// Group key expression
    pub key: Expression,
    /// Keep single-record groups in grouped shape
    #[serde(default)]
    pub force: bool,
}

/// `[comments]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommentsConfig {
    /// Expression yielding the comment list
    pub field: Expression,
    /// Path to the text inside each comment element
    #[serde(default)]
    pub text: Option<FieldPath>,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            field: Expression::field(FieldPath::field("comments")),
            text: None,
        }
    }
}

/// `[state]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// Whether a vulnerability still needs work
    #[serde(default = "always")]
    pub open: Condition,
    /// Reopen closed issues with open vulnerabilities
    #[serde(default = "default_true")]
    pub reopen: bool,
    /// Close open issues without open vulnerabilities
    #[serde(default = "default_true")]
    pub close: bool,
    /// Push current field values to correlated issues
    #[serde(default)]
    pub refresh_fields: bool,
    /// Tracker comment added when reopening
    #[serde(default)]
    pub reopen_comment: Option<String>,
    /// Tracker comment added when closing
    #[serde(default)]
    pub close_comment: Option<String>,
    /// Tracker comment added when new vulnerabilities join an issue; empty
    /// to disable
    #[serde(default)]
    pub link_comment: Option<String>,
}

fn always() -> Condition {
    Condition::Always
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            open: Condition::Always,
            reopen: true,
            close: true,
            refresh_fields: false,
            reopen_comment: None,
            close_comment: None,
            link_comment: None,
        }
    }
}

/// One `[[preprocess]]` stage
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreprocessConfig {
    /// [`ConditionFilter`]
    Filter {
        /// Stage name
        name: String,
        /// Include or exclude matches
        #[serde(default)]
        mode: MatchMode,
        /// Predicate
        condition: Condition,
    },
    /// [`SetFieldEnricher`]
    Set {
        /// Target field
        field: String,
        /// New value
        value: Expression,
    },
    /// [`OnDemandEnricher`]
    OnDemand {
        /// Target field
        field: String,
        /// Resource uri template
        uri: Expression,
        /// Part of the resource to keep
        #[serde(default)]
        select: Option<FieldPath>,
        /// Share one fetch between fields with the same uri
        #[serde(default)]
        cache: bool,
    },
    /// [`StateEnricher`]
    State {
        /// Target field
        field: String,
        /// Open predicate; defaults to `[state].open`
        #[serde(default)]
        open: Option<Condition>,
    },
    /// [`LocatorEnricher`]
    Locator {
        /// Field receiving the issue id
        id_field: String,
        /// Field receiving the deep link
        link_field: String,
    },
}

impl SyncConfig {
    /// Create configuration with defaults
    #[must_use]
    pub fn new(tracker_name: impl Into<String>, group_key: Expression) -> Self {
        Self {
            tracker_name: tracker_name.into(),
            page_size: DEFAULT_PAGE_SIZE,
            comment_template: default_template(),
            grouping: GroupingConfig {
                key: group_key,
                force: false,
            },
            comments: CommentsConfig::default(),
            state: StateConfig::default(),
            fields: Vec::new(),
            preprocess: Vec::new(),
            record_id_field: None,
        }
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError`] on malformed or invalid configuration
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or is invalid
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// With page size
    #[inline]
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// With comment template
    #[inline]
    #[must_use]
    pub fn with_comment_template(mut self, template: impl Into<String>) -> Self {
        self.comment_template = template.into();
        self
    }

    /// With force grouping
    #[inline]
    #[must_use]
    pub fn with_force_grouping(mut self, force: bool) -> Self {
        self.grouping.force = force;
        self
    }

    /// With field mapping appended
    #[inline]
    #[must_use]
    pub fn with_field(mut self, mapping: FieldMapping) -> Self {
        self.fields.push(mapping);
        self
    }

    /// With preprocessor stage appended
    #[inline]
    #[must_use]
    pub fn with_preprocess(mut self, stage: PreprocessConfig) -> Self {
        self.preprocess.push(stage);
        self
    }

    /// With open predicate
    #[inline]
    #[must_use]
    pub fn with_open_condition(mut self, open: Condition) -> Self {
        self.state.open = open;
        self
    }

    /// With field refresh on correlated issues
    #[inline]
    #[must_use]
    pub fn with_refresh_fields(mut self, refresh: bool) -> Self {
        self.state.refresh_fields = refresh;
        self
    }

    /// Check semantic constraints
    ///
    /// # Errors
    /// Returns [`ConfigError`] describing the first violation
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tracker_name.trim().is_empty() {
            return Err(ConfigError::invalid("tracker_name must not be empty"));
        }
        if self.page_size == 0 {
            return Err(ConfigError::invalid("page_size must be greater than zero"));
        }
        let mut names = HashSet::new();
        for mapping in &self.fields {
            if mapping.name.trim().is_empty() {
                return Err(ConfigError::invalid("field mapping name must not be empty"));
            }
            if !names.insert(mapping.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "field mapping '{}' defined more than once",
                    mapping.name
                )));
            }
        }
        for stage in &self.preprocess {
            if let Some(field) = stage.target_field() {
                if field.trim().is_empty() {
                    return Err(ConfigError::invalid("preprocess target field must not be empty"));
                }
            }
        }
        self.codec()?;
        Ok(())
    }

    /// Compiled locator codec
    ///
    /// # Errors
    /// Returns [`ConfigError::Template`] if the template is invalid
    pub fn codec(&self) -> Result<LocatorCodec, ConfigError> {
        Ok(LocatorCodec::builder(&self.comment_template)
            .tracker_name(&self.tracker_name)
            .build()?)
    }

    /// Compile into a runnable plan
    ///
    /// `fetcher` backs the placeholders installed by `on_demand` stages.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the configuration is invalid
    pub fn compile(&self, fetcher: Arc<dyn ResourceFetcher>) -> Result<SyncPlan, ConfigError> {
        self.validate()?;
        let codec = Arc::new(self.codec()?);

        let mut comments = CommentSelector::new(self.comments.field.clone());
        if let Some(text) = &self.comments.text {
            comments = comments.with_text_path(text.clone());
        }

        let mut observer = TracingObserver::new();
        if let Some(field) = &self.record_id_field {
            observer = observer.with_id_field(field.clone());
        }
        let mut chain = PreprocessorChain::new().with_observer(Arc::new(observer));
        for stage in &self.preprocess {
            chain.push(stage.build(&fetcher, &codec, &comments, &self.state.open));
        }

        let grouping = self
            .fields
            .iter()
            .cloned()
            .fold(
                GroupingEngine::new(self.grouping.key.clone()).with_force_grouping(self.grouping.force),
                GroupingEngine::with_mapping,
            );

        let policy = TransitionPolicy {
            reopen: self.state.reopen,
            close: self.state.close,
            refresh_fields: self.state.refresh_fields,
            reopen_comment: self
                .state
                .reopen_comment
                .clone()
                .unwrap_or_else(|| DEFAULT_REOPEN_COMMENT.to_string()),
            close_comment: self
                .state
                .close_comment
                .clone()
                .unwrap_or_else(|| DEFAULT_CLOSE_COMMENT.to_string()),
            link_comment: self
                .state
                .link_comment
                .clone()
                .unwrap_or_else(|| DEFAULT_LINK_COMMENT.to_string()),
        };

        tracing::debug!(
            tracker = %self.tracker_name,
            stages = chain.len(),
            mappings = self.fields.len(),
            "configuration compiled"
        );

        Ok(SyncPlan {
            tracker_name: self.tracker_name.clone(),
            page_size: self.page_size,
            codec,
            chain,
            grouping,
            comments,
            open: self.state.open.clone(),
            policy,
        })
    }
}

impl PreprocessConfig {
    fn target_field(&self) -> Option<&str> {
        match self {
            Self::Filter { .. } => None,
            Self::Set { field, .. } | Self::OnDemand { field, .. } | Self::State { field, .. } => {
                Some(field)
            }
            Self::Locator { link_field, .. } => Some(link_field),
        }
    }

    fn build(
        &self,
        fetcher: &Arc<dyn ResourceFetcher>,
        codec: &Arc<LocatorCodec>,
        comments: &CommentSelector,
        default_open: &Condition,
    ) -> Stage {
        match self {
            Self::Filter { name, mode, condition } => Stage::Filter(Box::new(ConditionFilter::new(
                name.clone(),
                condition.clone(),
                *mode,
            ))),
            Self::Set { field, value } => {
                Stage::Enrich(Box::new(SetFieldEnricher::new(field.clone(), value.clone())))
            }
            Self::OnDemand {
                field,
                uri,
                select,
                cache,
            } => {
                let mut enricher = OnDemandEnricher::new(field.clone(), uri.clone(), Arc::clone(fetcher))
                    .cacheable(*cache);
                if let Some(path) = select {
                    enricher = enricher.with_select(path.clone());
                }
                Stage::Enrich(Box::new(enricher))
            }
            Self::State { field, open } => Stage::Enrich(Box::new(StateEnricher::new(
                field.clone(),
                open.clone().unwrap_or_else(|| default_open.clone()),
            ))),
            Self::Locator { id_field, link_field } => Stage::Enrich(Box::new(LocatorEnricher::new(
                Arc::clone(codec),
                comments.clone(),
                id_field.clone(),
                link_field.clone(),
            ))),
        }
    }
}

/// When and how correlated issues are transitioned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPolicy {
    /// Reopen closed issues with open vulnerabilities
    pub reopen: bool,
    /// Close open issues without open vulnerabilities
    pub close: bool,
    /// Push current field values to correlated issues
    pub refresh_fields: bool,
    /// Tracker comment added when reopening
    pub reopen_comment: String,
    /// Tracker comment added when closing
    pub close_comment: String,
    /// Tracker comment added when new vulnerabilities join a correlated
    /// issue; skipped when empty
    pub link_comment: String,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            reopen: true,
            close: true,
            refresh_fields: false,
            reopen_comment: DEFAULT_REOPEN_COMMENT.to_string(),
            close_comment: DEFAULT_CLOSE_COMMENT.to_string(),
            link_comment: DEFAULT_LINK_COMMENT.to_string(),
        }
    }
}

/// Compiled configuration
#[derive(Debug)]
pub struct SyncPlan {
    tracker_name: String,
    page_size: usize,
    codec: Arc<LocatorCodec>,
    chain: PreprocessorChain,
    grouping: GroupingEngine,
    comments: CommentSelector,
    open: Condition,
    policy: TransitionPolicy,
}

impl SyncPlan {
    /// Create plan with an empty chain, default comments, an always-open
    /// predicate and the default policy
    #[must_use]
    pub fn new(tracker_name: impl Into<String>, codec: LocatorCodec, grouping: GroupingEngine) -> Self {
        Self {
            tracker_name: tracker_name.into(),
            page_size: DEFAULT_PAGE_SIZE,
            codec: Arc::new(codec),
            chain: PreprocessorChain::new(),
            grouping,
            comments: CommentSelector::default(),
            open: Condition::Always,
            policy: TransitionPolicy::default(),
        }
    }

    /// With page size
    #[inline]
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// With preprocessor chain
    #[inline]
    #[must_use]
    pub fn with_chain(mut self, chain: PreprocessorChain) -> Self {
        self.chain = chain;
        self
    }

    /// With comment selector
    #[inline]
    #[must_use]
    pub fn with_comments(mut self, comments: CommentSelector) -> Self {
        self.comments = comments;
        self
    }

    /// With open predicate
    #[inline]
    #[must_use]
    pub fn with_open_condition(mut self, open: Condition) -> Self {
        self.open = open;
        self
    }

    /// With transition policy
    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Tracker name
    #[inline]
    #[must_use]
    pub fn tracker_name(&self) -> &str {
        &self.tracker_name
    }

    /// Records per page
    #[inline]
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Locator codec
    #[inline]
    #[must_use]
    pub fn codec(&self) -> &LocatorCodec {
        &self.codec
    }

    /// Preprocessor chain
    #[inline]
    #[must_use]
    pub fn chain(&self) -> &PreprocessorChain {
        &self.chain
    }

    /// Grouping engine
    #[inline]
    #[must_use]
    pub fn grouping(&self) -> &GroupingEngine {
        &self.grouping
    }

    /// Comment selector
    #[inline]
    #[must_use]
    pub fn comments(&self) -> &CommentSelector {
        &self.comments
    }

    /// Open predicate
    #[inline]
    #[must_use]
    pub fn open_condition(&self) -> &Condition {
        &self.open
    }

    /// Transition policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }
}
