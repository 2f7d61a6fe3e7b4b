//! Summary rebuild over the report directory.
//!
//! Bots write one `report_<user>.json` per client at their own pace. A
//! rebuild reads every such file from scratch and replaces `summary.json`
//! wholesale; nothing is carried over from a previous summary.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use murmur_types::models::{MessageKind, RANKING_SIZE, Ranking, Report, ReportEntry, Summary};
use murmur_types::timestamp;

use crate::files;

pub const SUMMARY_FILE: &str = "summary.json";
const REPORT_PREFIX: &str = "report_";
const REPORT_SUFFIX: &str = ".json";

/// Rebuilds `summary.json` from the report files of one directory.
#[derive(Debug, Clone)]
pub struct Aggregator {
    dir: PathBuf,
}

impl Aggregator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }

    /// Report files in the directory, sorted by name so repeated rebuilds
    /// see them in the same order. A missing directory has no reports.
    pub fn report_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("listing {}", self.dir.display()));
            }
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", self.dir.display(), e);
                    continue;
                }
            };
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // is_file follows symlinks, so a linked report still counts.
            let path = entry.path();
            if name.starts_with(REPORT_PREFIX) && name.ends_with(REPORT_SUFFIX) && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Compute a summary from the current report files without writing it.
    pub fn compute(&self, generated_at: DateTime<Utc>) -> Result<Summary> {
        let mut tally = ReportTally::default();
        for path in self.report_files()? {
            match read_report(&path) {
                Ok(report) => tally.add(&report),
                Err(e) => warn!("Skipping report {}: {:#}", path.display(), e),
            }
        }
        Ok(tally.into_summary(generated_at))
    }

    /// Recompute the summary and replace `summary.json` with it.
    pub fn rebuild(&self) -> Result<Summary> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let summary = self.compute(timestamp::now())?;
        files::write_json(&self.summary_path(), &summary)?;

        info!(
            "Summary rebuilt in {} ({} reports aggregated)",
            self.dir.display(),
            summary.total_reports
        );
        Ok(summary)
    }

    /// The last written summary, `None` if no rebuild has happened yet.
    pub fn load(&self) -> Result<Option<Summary>> {
        files::read_json(&self.summary_path())
    }
}

fn read_report(path: &Path) -> Result<Report> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Running counts over a set of reports.
#[derive(Default)]
struct ReportTally {
    reports: usize,
    users: HashSet<String>,
    public: u64,
    private: u64,
    channels: Counter,
    senders: Counter,
}

impl ReportTally {
    fn add(&mut self, report: &Report) {
        self.reports += 1;
        self.users.insert(report.user.clone());

        // A bot only records what it sent itself, so anything not marked
        // private there was a channel publish.
        for entry in &report.sent_messages {
            self.count(entry, Some(entry.kind().unwrap_or(MessageKind::Public)));
        }
        for entry in &report.received_messages {
            self.count(entry, entry.kind());
        }
    }

    fn count(&mut self, entry: &ReportEntry, kind: Option<MessageKind>) {
        match kind {
            Some(MessageKind::Public) => {
                self.public += 1;
                if let Some(channel) = entry.channel() {
                    self.channels.bump(channel);
                }
            }
            Some(MessageKind::Private) => self.private += 1,
            None => {}
        }

        if let Some(sender) = entry.sender() {
            self.senders.bump(sender);
        }
    }

    fn into_summary(self, generated_at: DateTime<Utc>) -> Summary {
        Summary {
            total_users: self.users.len(),
            total_reports: self.reports,
            total_messages_public: self.public,
            total_messages_private: self.private,
            top_channels: self.channels.top(RANKING_SIZE),
            top_users: self.senders.top(RANKING_SIZE),
            generated_at,
        }
    }
}

/// Counts keyed by name, remembering first-seen order for tie breaks.
#[derive(Default)]
struct Counter {
    counts: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

impl Counter {
    fn bump(&mut self, name: &str) {
        match self.index.get(name) {
            Some(&i) => self.counts[i].1 += 1,
            None => {
                self.index.insert(name.to_string(), self.counts.len());
                self.counts.push((name.to_string(), 1));
            }
        }
    }

    fn top(self, n: usize) -> Ranking {
        let mut counts = self.counts;
        // sort_by is stable: equal counts keep first-seen order.
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.truncate(n);
        Ranking::new(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn empty_directory_yields_zero_summary() {
        let dir = tempfile::tempdir().unwrap();
        let summary = Aggregator::new(dir.path()).rebuild().unwrap();

        assert_eq!(summary.total_reports, 0);
        assert_eq!(summary.total_users, 0);
        assert!(summary.top_channels.is_empty());
        assert!(dir.path().join(SUMMARY_FILE).exists());
    }

    #[test]
    fn missing_directory_has_no_reports() {
        let dir = tempfile::tempdir().unwrap();
        let agg = Aggregator::new(dir.path().join("nowhere"));
        assert!(agg.report_files().unwrap().is_empty());
        assert!(agg.load().unwrap().is_none());
    }

    #[test]
    fn only_report_files_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "report_b.json", "{}");
        write(dir.path(), "report_a.json", "{}");
        write(dir.path(), "report_a.txt", "text");
        write(dir.path(), "summary.json", "{}");
        fs::create_dir(dir.path().join("report_dir.json")).unwrap();

        let names: Vec<_> = Aggregator::new(dir.path())
            .report_files()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["report_a.json", "report_b.json"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_reports_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let target = elsewhere.path().join("ana.json");
        fs::write(
            &target,
            r#"{"user": "Ana", "received_messages": [{"type": "public", "from": "Bruno", "channel": "Games"}]}"#,
        )
        .unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("report_Ana.json")).unwrap();
        std::os::unix::fs::symlink(elsewhere.path().join("gone.json"), dir.path().join("report_gone.json"))
            .unwrap();

        let agg = Aggregator::new(dir.path());
        assert_eq!(agg.report_files().unwrap().len(), 1);

        let summary = agg.rebuild().unwrap();
        assert_eq!(summary.total_reports, 1);
        assert_eq!(summary.total_messages_public, 1);
    }

    #[test]
    fn counts_sent_and_received_entries() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "report_Ana.json",
            r#"{
                "user": "Ana",
                "sent_messages": [
                    {"type": "publica", "to": "Games", "content": "a"},
                    {"type": "privada", "to": "Bruno", "content": "b"},
                    "(privada) para Bruno: \"c\""
                ],
                "received_messages": [
                    {"type": "pública", "from": "Bruno", "channel": "Games"},
                    {"type": "privada", "from": "Bruno"},
                    {"type": "desconhecido", "content": "???"}
                ]
            }"#,
        );
        write(
            dir.path(),
            "report_Bruno.json",
            r#"{
                "user": "Bruno",
                "sent_messages": [],
                "received_messages": [
                    {"type": "public", "from": "Ana", "channel": "Filmes"},
                    {"type": "public", "from": "Ana", "channel": "Games"}
                ]
            }"#,
        );

        let summary = Aggregator::new(dir.path()).rebuild().unwrap();
        assert_eq!(summary.total_reports, 2);
        assert_eq!(summary.total_users, 2);
        assert_eq!(summary.total_messages_public, 4);
        assert_eq!(summary.total_messages_private, 3);
        assert_eq!(
            summary.top_channels.entries(),
            [("Games".to_string(), 2), ("Filmes".to_string(), 1)]
        );
        assert_eq!(
            summary.top_users.entries(),
            [("Bruno".to_string(), 2), ("Ana".to_string(), 2)]
        );
    }

    #[test]
    fn corrupt_reports_are_excluded_entirely() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "report_ok.json",
            r#"{"user": "Ana", "received_messages": [{"type": "privada", "from": "Bruno"}]}"#,
        );
        write(
            dir.path(),
            "report_partial.json",
            r#"{"user": "Carlos", "received_messages": [{"type": "privada", "from": "Di"#,
        );
        write(dir.path(), "report_nouser.json", r#"{"received_messages": []}"#);

        let summary = Aggregator::new(dir.path()).rebuild().unwrap();
        assert_eq!(summary.total_reports, 1);
        assert_eq!(summary.total_users, 1);
        assert_eq!(summary.total_messages_private, 1);
        assert_eq!(summary.top_users.names().collect::<Vec<_>>(), vec!["Bruno"]);
    }

    #[test]
    fn rankings_are_capped_and_ties_keep_first_seen_order() {
        let dir = tempfile::tempdir().unwrap();
        let received: Vec<String> = ["c1", "c2", "c3", "c4", "c5", "c6", "c7", "c3", "c7"]
            .iter()
            .map(|c| format!(r#"{{"type": "public", "from": "u-{c}", "channel": "{c}"}}"#))
            .collect();
        write(
            dir.path(),
            "report_x.json",
            &format!(r#"{{"user": "x", "received_messages": [{}]}}"#, received.join(",")),
        );

        let summary = Aggregator::new(dir.path()).rebuild().unwrap();
        assert_eq!(
            summary.top_channels.names().collect::<Vec<_>>(),
            vec!["c3", "c7", "c1", "c2", "c4"]
        );
        assert_eq!(summary.top_users.len(), RANKING_SIZE);
        let counts: Vec<u64> = summary.top_channels.entries().iter().map(|(_, n)| *n).collect();
        assert!(counts.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn rebuild_is_idempotent_apart_from_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "report_a.json",
            r#"{"user": "a", "received_messages": [
                {"type": "public", "from": "b", "channel": "x"},
                {"type": "public", "from": "c", "channel": "y"}
            ]}"#,
        );
        let agg = Aggregator::new(dir.path());
        let at = timestamp::parse("2026-10-19T10:00:00Z").unwrap();

        let first = serde_json::to_string_pretty(&agg.compute(at).unwrap()).unwrap();
        let second = serde_json::to_string_pretty(&agg.compute(at).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn summary_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "report_a.json",
            r#"{"user": "a", "received_messages": [{"type": "public", "from": "b", "channel": "x"}]}"#,
        );
        let agg = Aggregator::new(dir.path());
        let written = agg.rebuild().unwrap();
        assert_eq!(agg.load().unwrap(), Some(written));
    }
}
