//! Command handlers
//!
//! Handlers write their normal output to `out`; diagnostics go through
//! `tracing`.

use crate::file_source::JsonFileSource;
use crate::file_tracker::JsonFileTracker;
use anyhow::{bail, Context, Result};
use bugsync_core::{GroupAction, Reconciler, SyncConfig};
use bugsync_locator::{IssueLocator, LocatorCodec};
use bugsync_pipeline::SourceQuery;
use bugsync_record::{FetchError, ResourceFetcher};
use clap::ArgMatches;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Outcome of a command that ran to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Clean,
    /// Some groups failed and should be retried
    Failures,
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        match status {
            Status::Clean => ExitCode::SUCCESS,
            Status::Failures => ExitCode::from(2),
        }
    }
}

pub(crate) fn dispatch(matches: &ArgMatches, out: &mut dyn Write) -> Result<Status> {
    match matches.subcommand() {
        Some(("sync", m)) => sync(&SyncArgs::from_matches(m)?, out),
        Some(("check", m)) => check(
            required::<PathBuf>(m, "config")?,
            m.get_one::<PathBuf>("records").map(PathBuf::as_path),
            out,
        ),
        Some(("encode", m)) => encode(
            &codec(m)?,
            m.get_one::<String>("id").cloned(),
            required::<String>(m, "link")?.clone(),
            out,
        ),
        Some(("decode", m)) => decode(&codec(m)?, required::<String>(m, "comment")?, out),
        Some((name, _)) => bail!("unknown command '{name}'"),
        None => bail!("no command given"),
    }
}

fn required<'m, T: Clone + Send + Sync + 'static>(matches: &'m ArgMatches, name: &str) -> Result<&'m T> {
    matches
        .get_one::<T>(name)
        .with_context(|| format!("missing --{name}"))
}

fn codec(matches: &ArgMatches) -> Result<LocatorCodec> {
    let mut builder = LocatorCodec::builder(required::<String>(matches, "template")?.as_str());
    if let Some(tracker) = matches.get_one::<String>("tracker") {
        builder = builder.tracker_name(tracker.as_str());
    }
    builder.build().context("invalid template")
}

#[derive(Debug, Clone)]
pub(crate) struct SyncArgs {
    pub(crate) config: PathBuf,
    pub(crate) records: PathBuf,
    pub(crate) issues: PathBuf,
    pub(crate) id_field: String,
    pub(crate) link_base: Option<String>,
    pub(crate) json: bool,
}

impl SyncArgs {
    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            config: required::<PathBuf>(matches, "config")?.clone(),
            records: required::<PathBuf>(matches, "records")?.clone(),
            issues: required::<PathBuf>(matches, "issues")?.clone(),
            id_field: required::<String>(matches, "id-field")?.clone(),
            link_base: matches.get_one::<String>("link-base").cloned(),
            json: matches.get_flag("json"),
        })
    }
}

pub(crate) fn sync(args: &SyncArgs, out: &mut dyn Write) -> Result<Status> {
    let config = SyncConfig::from_path(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let source = Arc::new(JsonFileSource::open(&args.records, args.id_field.as_str())?);
    let fetcher: Arc<dyn ResourceFetcher> = source.clone();
    let plan = config.compile(fetcher)?;

    let mut tracker = JsonFileTracker::open(&args.issues, plan.tracker_name())?;
    if let Some(base) = &args.link_base {
        tracker = tracker.with_link_base(base.as_str());
    }

    let report = Reconciler::new(&plan, &tracker)
        .with_commenter(source.as_ref())
        .run(source.as_ref())?;

    if args.json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{}", report.summary())?;
        for outcome in report.failures() {
            if let GroupAction::Failed { error, .. } = &outcome.action {
                writeln!(out, "failed {}: {error}", outcome.key)?;
            }
        }
    }
    Ok(if report.has_failures() {
        Status::Failures
    } else {
        Status::Clean
    })
}

struct NoResources;

impl ResourceFetcher for NoResources {
    fn fetch_resource(&self, uri: &str) -> Result<Value, FetchError> {
        Err(FetchError::Unsupported(format!("no resources while checking ({uri})")))
    }
}

pub(crate) fn check(path: &Path, records: Option<&Path>, out: &mut dyn Write) -> Result<Status> {
    let config = SyncConfig::from_path(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let plan = config.compile(Arc::new(NoResources))?;
    writeln!(
        out,
        "ok: tracker {}, page size {}, {} fields",
        plan.tracker_name(),
        plan.page_size(),
        plan.grouping().mappings().len()
    )?;
    for name in plan.chain().stage_names() {
        writeln!(out, "  stage {name}")?;
    }
    if let Some(records) = records {
        let source = JsonFileSource::open(records, "id")?;
        match source.total_count()? {
            Some(total) => writeln!(out, "source {}: {total} records", source.describe())?,
            None => writeln!(out, "source {}: size unknown", source.describe())?,
        }
    }
    Ok(Status::Clean)
}

pub(crate) fn encode(
    codec: &LocatorCodec,
    id: Option<String>,
    link: String,
    out: &mut dyn Write,
) -> Result<Status> {
    let locator = IssueLocator::new(id, Some(link)).context("locator needs an id or a link")?;
    writeln!(out, "{}", codec.encode(&locator))?;
    Ok(Status::Clean)
}

pub(crate) fn decode(codec: &LocatorCodec, comment: &str, out: &mut dyn Write) -> Result<Status> {
    let locator = codec.decode(comment)?;
    writeln!(out, "{}", serde_json::to_string(&locator)?)?;
    Ok(Status::Clean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;

    const CONFIG: &str = r#"
tracker_name = "FILE"

[grouping]
key = "${application}"

[state]
open = { op = "not", condition = { op = "is_true", value = "${removed}" } }

[[fields]]
name = "summary"
value = "${@size} findings in ${@key}"
required = true
"#;

    fn run(args: &[&str]) -> (Result<Status>, String) {
        let matches = cli::build()
            .try_get_matches_from(std::iter::once("bugsync").chain(args.iter().copied()))
            .unwrap();
        let mut out = Vec::new();
        let status = dispatch(&matches, &mut out);
        (status, String::from_utf8(out).unwrap())
    }

    struct Workspace {
        dir: tempfile::TempDir,
    }

    impl Workspace {
        fn new(records: &Value) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("bugsync.toml"), CONFIG).unwrap();
            fs::write(dir.path().join("records.json"), records.to_string()).unwrap();
            Self { dir }
        }

        fn path(&self, name: &str) -> String {
            self.dir.path().join(name).display().to_string()
        }

        fn sync(&self) -> (Result<Status>, String) {
            let (config, records, issues) = (
                self.path("bugsync.toml"),
                self.path("records.json"),
                self.path("issues.json"),
            );
            run(&["sync", "--config", &config, "--records", &records, "--issues", &issues])
        }

        fn json(&self, name: &str) -> Value {
            serde_json::from_str(&fs::read_to_string(self.dir.path().join(name)).unwrap()).unwrap()
        }
    }

    fn records() -> Value {
        json!([
            { "id": 1, "application": "A", "removed": false },
            { "id": 2, "application": "B", "removed": false },
            { "id": 3, "application": "A", "removed": false },
        ])
    }

    #[test]
    fn sync_twice_submits_once() {
        let workspace = Workspace::new(&records());

        let (status, output) = workspace.sync();
        assert_eq!(status.unwrap(), Status::Clean);
        assert_eq!(
            output.trim(),
            "2 submitted, 0 reopened, 0 closed, 0 updated, 0 unchanged, 0 failed"
        );
        let written = workspace.json("records.json");
        assert_eq!(
            written[2]["comments"],
            json!(["--- Vulnerability submitted to FILE: ID ISSUE-1 Location local://issues/ISSUE-1"])
        );

        let (status, output) = workspace.sync();
        assert_eq!(status.unwrap(), Status::Clean);
        assert!(output.starts_with("0 submitted"));
        assert_eq!(workspace.json("issues.json")["issues"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn sync_reports_failures_with_status() {
        let workspace = Workspace::new(&json!([{ "id": 1, "application": "A" }]));
        workspace.sync().0.unwrap();

        let mut issues = workspace.json("issues.json");
        issues["issues"] = json!([]);
        fs::write(workspace.dir.path().join("issues.json"), issues.to_string()).unwrap();

        let (status, output) = workspace.sync();
        assert_eq!(status.unwrap(), Status::Failures);
        assert!(output.contains("failed A: tracker error: issue not found"));
    }

    #[test]
    fn missing_config_is_an_error() {
        let workspace = Workspace::new(&records());
        fs::remove_file(workspace.dir.path().join("bugsync.toml")).unwrap();
        assert!(workspace.sync().0.is_err());
    }

    #[test]
    fn check_lists_stages() {
        let workspace = Workspace::new(&records());
        let config = workspace.path("bugsync.toml");
        let (status, output) = run(&["check", "--config", &config]);
        assert_eq!(status.unwrap(), Status::Clean);
        assert!(output.starts_with("ok: tracker FILE, page size 50, 1 fields"));

        let records = workspace.path("records.json");
        let (status, output) = run(&["check", "--config", &config, "--records", &records]);
        assert_eq!(status.unwrap(), Status::Clean);
        assert!(output.ends_with(&format!("source {records}: 3 records\n")));
    }

    #[test]
    fn encode_then_decode() {
        let template = "--- submitted to {0}: ID {1} Location {2}";
        let (status, encoded) = run(&[
            "encode", "--template", template, "--tracker", "JIRA", "--id", "42", "--link",
            "http://x/y#z",
        ]);
        status.unwrap();
        assert_eq!(encoded.trim_end(), "--- submitted to JIRA: ID 42 Location http://x/y#z");

        let (status, decoded) = run(&["decode", "--template", template, "--tracker", "JIRA", encoded.trim_end()]);
        status.unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&decoded).unwrap(),
            json!({ "id": "42", "deepLink": "http://x/y#z" })
        );
    }

    #[test]
    fn decode_rejects_foreign_comments() {
        let (status, _) = run(&["decode", "--tracker", "JIRA", "looks fine to me"]);
        assert!(status.is_err());
    }
}
