//! Reconciliation controller
//!
//! Decides, per group, whether to submit a new issue or to bring an existing
//! one in line with the source state. Tracker and comment failures are local
//! to their group: they are recorded in the [`SyncReport`] and the run moves
//! on. Only retrieval and grouping failures abort a run.

use crate::config::SyncPlan;
use crate::error::SyncError;
use crate::group::Group;
use crate::report::{GroupAction, GroupOutcome, SyncReport};
use crate::tracker::{FieldMap, IssueState, IssueTracker};
use bugsync_locator::IssueLocator;
use bugsync_pipeline::{PagedRetriever, SourceCommenter, SourceQuery};
use bugsync_record::Record;

/// Runs a [`SyncPlan`] against one tracker
pub struct Reconciler<'a> {
    plan: &'a SyncPlan,
    tracker: &'a dyn IssueTracker,
    commenter: Option<&'a dyn SourceCommenter>,
}

impl<'a> Reconciler<'a> {
    /// Create reconciler
    ///
    /// Without a commenter, locator comments for new issues are returned in
    /// [`GroupOutcome::pending_comment`] instead of being written.
    #[must_use]
    pub fn new(plan: &'a SyncPlan, tracker: &'a dyn IssueTracker) -> Self {
        Self {
            plan,
            tracker,
            commenter: None,
        }
    }

    /// With source commenter
    #[inline]
    #[must_use]
    pub fn with_commenter(mut self, commenter: &'a dyn SourceCommenter) -> Self {
        self.commenter = Some(commenter);
        self
    }

    /// Retrieve, group and reconcile everything `query` returns
    ///
    /// # Errors
    /// Returns [`SyncError::Retrieval`] or [`SyncError::Grouping`] if the
    /// record stream cannot be read to the end. Per-group failures are
    /// reported, not returned.
    pub fn run(&self, query: &dyn SourceQuery) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::start(self.tracker.name(), query.describe());
        let span = tracing::info_span!("sync", run_id = %report.run_id);
        let _enter = span.enter();
        tracing::info!(tracker = %report.tracker, source = %report.source, "sync started");

        let mut retriever = PagedRetriever::new(query, self.plan.chain(), self.plan.page_size())?;
        let groups = self.plan.grouping().group(retriever.by_ref())?;
        report.retrieval = retriever.stats();
        report.unkeyed = groups.unkeyed();

        for (_, mut group) in groups {
            let outcome = self.reconcile(&mut group);
            report.groups.push(outcome);
        }

        report.finish();
        tracing::info!(summary = %report.summary(), "sync finished");
        Ok(report)
    }

    /// Reconcile one group
    pub fn reconcile(&self, group: &mut Group) -> GroupOutcome {
        let span = tracing::debug_span!("group", key = %group.key());
        let _enter = span.enter();

        match self.try_reconcile(group) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(%error, retryable = error.is_retryable(), "group failed");
                GroupOutcome::new(group.key(), group.len(), GroupAction::failed(&error))
            }
        }
    }

    fn try_reconcile(&self, group: &mut Group) -> Result<GroupOutcome, SyncError> {
        let fields = group.fields().map_err(|error| SyncError::Mapping(error.clone()))?.clone();
        let found = self.member_locators(group.records_mut())?;

        let mut known = found.iter().flatten();
        match known.next().cloned() {
            None => self.submit(group, &fields),
            Some(locator) => {
                if let Some(other) = known.find(|other| **other != locator) {
                    tracing::warn!(
                        %locator,
                        %other,
                        "group members reference different issues; using the first"
                    );
                }
                self.correlate(group, &fields, locator, &found)
            }
        }
    }

    fn member_locators(&self, records: &mut [Record]) -> Result<Vec<Option<IssueLocator>>, SyncError> {
        records
            .iter_mut()
            .map(|record| -> Result<Option<IssueLocator>, SyncError> {
                let comments = self.plan.comments().comments(record)?;
                Ok(self.plan.codec().scan(&comments).locator)
            })
            .collect()
    }

    fn submit(&self, group: &Group, fields: &FieldMap) -> Result<GroupOutcome, SyncError> {
        let locator = self.tracker.submit(fields)?;
        tracing::info!(%locator, records = group.len(), "issue submitted");

        let comment = self.plan.codec().encode(&locator);
        let mut outcome = GroupOutcome::new(
            group.key(),
            group.len(),
            GroupAction::Submitted {
                locator: locator.clone(),
            },
        );
        match self.commenter {
            Some(commenter) => {
                outcome.annotated = annotate(commenter, group.records().iter(), &locator, &comment)?;
            }
            None => outcome.pending_comment = Some(comment),
        }
        Ok(outcome)
    }

    fn correlate(
        &self,
        group: &mut Group,
        fields: &FieldMap,
        locator: IssueLocator,
        found: &[Option<IssueLocator>],
    ) -> Result<GroupOutcome, SyncError> {
        let mut open = false;
        for record in group.records_mut() {
            if self.plan.open_condition().evaluate(record)? {
                open = true;
                break;
            }
        }
        let desired = IssueState::from_open(open);
        let current = self.tracker.state(&locator)?;
        let policy = self.plan.policy();

        let mut action = if desired == current {
            GroupAction::Unchanged {
                locator: locator.clone(),
            }
        } else {
            match desired {
                IssueState::Open if policy.reopen => {
                    self.tracker
                        .transition(&locator, IssueState::Open, &policy.reopen_comment)?;
                    tracing::info!(%locator, "issue reopened");
                    GroupAction::Reopened {
                        locator: locator.clone(),
                    }
                }
                IssueState::Closed if policy.close => {
                    self.tracker
                        .transition(&locator, IssueState::Closed, &policy.close_comment)?;
                    tracing::info!(%locator, "issue closed");
                    GroupAction::Closed {
                        locator: locator.clone(),
                    }
                }
                _ => {
                    tracing::debug!(%locator, %current, %desired, "transition disabled");
                    GroupAction::Unchanged {
                        locator: locator.clone(),
                    }
                }
            }
        };

        if policy.refresh_fields {
            self.tracker.update_fields(&locator, fields)?;
            tracing::debug!(%locator, fields = fields.len(), "issue fields refreshed");
            if matches!(action, GroupAction::Unchanged { .. }) {
                action = GroupAction::Updated {
                    locator: locator.clone(),
                };
            }
        }

        let joined = found.iter().filter(|found| found.is_none()).count();
        if joined > 0 && !policy.link_comment.is_empty() {
            self.tracker.add_comment(&locator, &policy.link_comment)?;
            tracing::debug!(%locator, joined, "new records linked");
        }

        let mut outcome = GroupOutcome::new(group.key(), group.len(), action);
        let missing = group
            .records()
            .iter()
            .zip(found)
            .filter(|(_, found)| found.is_none())
            .map(|(record, _)| record);
        let comment = self.plan.codec().encode(&locator);
        match self.commenter {
            Some(commenter) => outcome.annotated = annotate(commenter, missing, &locator, &comment)?,
            None if joined > 0 => outcome.pending_comment = Some(comment),
            None => {}
        }
        Ok(outcome)
    }
}

fn annotate<'r>(
    commenter: &dyn SourceCommenter,
    records: impl Iterator<Item = &'r Record>,
    locator: &IssueLocator,
    comment: &str,
) -> Result<usize, SyncError> {
    let mut annotated = 0;
    for record in records {
        commenter
            .add_comment(record, comment)
            .map_err(|source| SyncError::Comment {
                locator: locator.to_string(),
                source,
            })?;
        annotated += 1;
    }
    if annotated > 0 {
        tracing::debug!(%locator, annotated, "locator comments written");
    }
    Ok(annotated)
}

impl std::fmt::Debug for Reconciler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("tracker", &self.tracker.name())
            .field("commenter", &self.commenter.is_some())
            .finish_non_exhaustive()
    }
}
