//! Issue tracker backed by a JSON file
//!
//! Every mutation is written through, so an interrupted run never forgets an
//! issue it created.

use anyhow::{Context, Result};
use bugsync_core::{FieldMap, IssueState, IssueTracker, TrackerError};
use bugsync_locator::IssueLocator;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Deep link prefix of issues in the file
pub(crate) const DEFAULT_LINK_BASE: &str = "local://issues";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredIssue {
    id: String,
    state: IssueState,
    #[serde(default)]
    fields: FieldMap,
    #[serde(default)]
    comments: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerDocument {
    #[serde(default)]
    issues: Vec<StoredIssue>,
}

pub(crate) struct JsonFileTracker {
    name: String,
    path: PathBuf,
    link_base: String,
    document: Mutex<TrackerDocument>,
}

impl JsonFileTracker {
    /// Open tracker file, starting empty if it does not exist
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed
    pub(crate) fn open(path: impl AsRef<Path>, name: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let document = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read issues from {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid issues file {}", path.display()))?
        } else {
            TrackerDocument::default()
        };
        Ok(Self {
            name: name.into(),
            path: path.to_path_buf(),
            link_base: DEFAULT_LINK_BASE.to_string(),
            document: Mutex::new(document),
        })
    }

    pub(crate) fn with_link_base(mut self, base: impl Into<String>) -> Self {
        self.link_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn locator(&self, id: &str) -> IssueLocator {
        IssueLocator::link(format!("{}/{id}", self.link_base)).with_id(id)
    }

    fn persist(&self, document: &TrackerDocument) -> Result<(), TrackerError> {
        let text = serde_json::to_string_pretty(document)
            .map_err(|e| TrackerError::Transport(e.to_string()))?;
        std::fs::write(&self.path, text)
            .map_err(|e| TrackerError::Transport(format!("{}: {e}", self.path.display())))
    }

    fn update<T>(
        &self,
        locator: &IssueLocator,
        f: impl FnOnce(&mut StoredIssue) -> T,
    ) -> Result<T, TrackerError> {
        let id = locator
            .id()
            .or_else(|| locator.deep_link().and_then(|link| link.rsplit('/').next()))
            .ok_or_else(|| TrackerError::not_found(locator))?;
        let mut document = self.document.lock();
        let issue = document
            .issues
            .iter_mut()
            .find(|issue| issue.id == id)
            .ok_or_else(|| TrackerError::not_found(locator))?;
        let result = f(issue);
        self.persist(&document)?;
        Ok(result)
    }
}

impl IssueTracker for JsonFileTracker {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn submit(&self, fields: &FieldMap) -> Result<IssueLocator, TrackerError> {
        let mut document = self.document.lock();
        let id = format!("ISSUE-{}", document.issues.len() + 1);
        document.issues.push(StoredIssue {
            id: id.clone(),
            state: IssueState::Open,
            fields: fields.clone(),
            comments: Vec::new(),
        });
        self.persist(&document)?;
        Ok(self.locator(&id))
    }

    fn state(&self, locator: &IssueLocator) -> Result<IssueState, TrackerError> {
        let id = locator
            .id()
            .or_else(|| locator.deep_link().and_then(|link| link.rsplit('/').next()))
            .ok_or_else(|| TrackerError::not_found(locator))?;
        self.document
            .lock()
            .issues
            .iter()
            .find(|issue| issue.id == id)
            .map(|issue| issue.state)
            .ok_or_else(|| TrackerError::not_found(locator))
    }

    fn transition(
        &self,
        locator: &IssueLocator,
        state: IssueState,
        comment: &str,
    ) -> Result<(), TrackerError> {
        self.update(locator, |issue| {
            issue.state = state;
            if !comment.is_empty() {
                issue.comments.push(comment.to_string());
            }
        })
    }

    fn add_comment(&self, locator: &IssueLocator, text: &str) -> Result<(), TrackerError> {
        self.update(locator, |issue| issue.comments.push(text.to_string()))
    }

    fn update_fields(&self, locator: &IssueLocator, fields: &FieldMap) -> Result<(), TrackerError> {
        self.update(locator, |issue| {
            for (name, value) in fields {
                issue.fields.insert(name.clone(), value.clone());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn issues_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.json");

        let tracker = JsonFileTracker::open(&path, "FILE").unwrap();
        let mut fields = FieldMap::new();
        fields.insert("summary".to_string(), json!("two findings"));
        let locator = tracker.submit(&fields).unwrap();
        assert_eq!(locator.id(), Some("ISSUE-1"));
        assert_eq!(locator.deep_link(), Some("local://issues/ISSUE-1"));

        tracker
            .transition(&locator, IssueState::Closed, "fixed")
            .unwrap();

        let reopened = JsonFileTracker::open(&path, "FILE").unwrap();
        assert_eq!(reopened.state(&locator).unwrap(), IssueState::Closed);
        assert_eq!(
            reopened.state(&IssueLocator::link("local://issues/ISSUE-1")).unwrap(),
            IssueState::Closed
        );
    }

    #[test]
    fn unknown_issue_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = JsonFileTracker::open(dir.path().join("i.json"), "FILE")
            .unwrap()
            .with_link_base("http://tracker/browse/");
        let locator = IssueLocator::link("http://tracker/browse/ISSUE-9");
        assert!(matches!(
            tracker.state(&locator),
            Err(TrackerError::NotFound { .. })
        ));
        assert!(matches!(
            tracker.add_comment(&locator, "hi"),
            Err(TrackerError::NotFound { .. })
        ));
    }
}
