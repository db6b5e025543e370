//! Cleanup crew — bounded inspector/surgeon loop over a candidate diff.
//!
//! The inspector scans read-only and emits findings; the surgeon applies
//! the smallest possible fix for each finding, one at a time, and refuses
//! to touch anything a finding does not name. Oversized fixes are never
//! auto-applied — they are flagged back to the worker roster. The loop ends
//! early on a clean scan or when the cycle budget runs out.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bridges::{ChatMessage, CompletionLimits, ModelClient, ToolExecutor, WorkspaceManager};
use crate::config::ModelSpec;
use crate::contracts::{parse_findings, parse_surgeon_fix, CleanupReport, Finding};
use crate::cost::CostTracker;
use crate::prompts;

pub struct CleanupCrew {
    client: Arc<dyn ModelClient>,
    executor: Arc<dyn ToolExecutor>,
    workspaces: Arc<dyn WorkspaceManager>,
    inspector: ModelSpec,
    surgeon: ModelSpec,
    max_cycles: u32,
    max_fix_lines: usize,
    cost: Arc<CostTracker>,
}

impl CleanupCrew {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ModelClient>,
        executor: Arc<dyn ToolExecutor>,
        workspaces: Arc<dyn WorkspaceManager>,
        inspector: ModelSpec,
        surgeon: ModelSpec,
        max_cycles: u32,
        max_fix_lines: usize,
        cost: Arc<CostTracker>,
    ) -> Self {
        Self {
            client,
            executor,
            workspaces,
            inspector,
            surgeon,
            max_cycles,
            max_fix_lines,
            cost,
        }
    }

    /// Sweep the workspace's current diff.
    ///
    /// `diff` is the candidate change at entry; later cycles re-diff the
    /// workspace so the inspector sees the surgeon's fixes.
    pub async fn sweep(&self, workspace: &Path, diff: &str, repo_map: &str) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut current_diff = diff.to_string();

        for cycle in 1..=self.max_cycles {
            report.cycles_run = cycle;

            let findings = match self.inspect(&current_diff, repo_map).await {
                Some(f) => f,
                None => {
                    warn!(cycle, "inspector scan failed to decode; sweep incomplete");
                    return report;
                }
            };

            if findings.is_empty() {
                info!(cycle, "inspector reports clean");
                report.clean = true;
                report.complete = true;
                return report;
            }

            debug!(cycle, count = findings.len(), "applying surgeon fixes");
            for finding in findings {
                self.treat(workspace, finding, &mut report).await;
            }

            if cycle == self.max_cycles {
                break;
            }

            current_diff = match self.workspaces.diff(workspace).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(cycle, error = %e, "re-diff failed; sweep incomplete");
                    return report;
                }
            };
        }

        // Budget exhausted with findings still outstanding.
        report
    }

    /// One read-only inspector scan. `None` when the scan cannot be decoded.
    async fn inspect(&self, diff: &str, repo_map: &str) -> Option<Vec<Finding>> {
        let request = format!("## Repository map\n{repo_map}\n\n## Diff under inspection\n{diff}");
        let completion = match self
            .client
            .complete(
                &self.inspector.model,
                prompts::INSPECTOR_PREAMBLE,
                &[ChatMessage::user(request)],
                CompletionLimits {
                    max_tokens: self.inspector.max_tokens,
                    temperature: self.inspector.temperature,
                },
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "inspector call failed");
                return None;
            }
        };

        self.cost.record(
            "inspector",
            completion.tokens_used,
            self.inspector.cost_of(completion.tokens_used),
        );

        parse_findings(&completion.text)
    }

    /// Ask the surgeon for a minimal fix and apply it if it qualifies.
    async fn treat(&self, workspace: &Path, finding: Finding, report: &mut CleanupReport) {
        let before = match self.executor.read_file(workspace, &finding.file).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(file = %finding.file, error = %e, "cannot read finding target; skipping");
                return;
            }
        };

        let request = format!(
            "## Finding ({severity}, {category})\n{description}\n\n\
             ## Suggested fix\n{suggested}\n\n## File `{file}` current contents\n{before}",
            severity = finding.severity,
            category = finding.category,
            description = finding.description,
            suggested = finding.suggested_fix,
            file = finding.file,
        );

        let completion = match self
            .client
            .complete(
                &self.surgeon.model,
                prompts::SURGEON_PREAMBLE,
                &[ChatMessage::user(request)],
                CompletionLimits {
                    max_tokens: self.surgeon.max_tokens,
                    temperature: self.surgeon.temperature,
                },
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(file = %finding.file, error = %e, "surgeon call failed; finding stays open");
                return;
            }
        };

        self.cost.record(
            "surgeon",
            completion.tokens_used,
            self.surgeon.cost_of(completion.tokens_used),
        );

        let fix = match parse_surgeon_fix(&completion.text) {
            Some(f) => f,
            None => {
                warn!(file = %finding.file, "surgeon fix failed to decode; finding stays open");
                return;
            }
        };

        // The surgeon only operates on the file the finding names.
        if fix.file != finding.file {
            warn!(
                named = %finding.file,
                attempted = %fix.file,
                "surgeon tried to touch a file outside the finding; refused"
            );
            return;
        }

        let size = fix_size(&before, &fix.contents);
        if size > self.max_fix_lines {
            info!(
                file = %finding.file,
                lines = size,
                limit = self.max_fix_lines,
                "fix exceeds size threshold; flagging for the worker roster"
            );
            report.flagged_for_escalation.push(finding);
            return;
        }

        match self
            .executor
            .write_file(workspace, &fix.file, &fix.contents)
            .await
        {
            Ok(()) => report.findings_fixed += 1,
            Err(e) => warn!(file = %fix.file, error = %e, "fix write failed; finding stays open"),
        }
    }
}

/// Size of a fix in changed lines: lines removed plus lines added, computed
/// over line multisets.
fn fix_size(before: &str, after: &str) -> usize {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for line in before.lines() {
        *counts.entry(line).or_default() += 1;
    }
    for line in after.lines() {
        *counts.entry(line).or_default() -= 1;
    }
    counts.values().map(|c| c.unsigned_abs() as usize).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridges::{CommandOutput, Completion};
    use crate::contracts::Severity;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(responses: &[&str]) -> Arc<Self> {
            let mut queue: Vec<String> = responses.iter().map(|s| s.to_string()).collect();
            queue.reverse();
            Arc::new(Self {
                responses: Mutex::new(queue),
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn complete(
            &self,
            _model: &str,
            _preamble: &str,
            _messages: &[ChatMessage],
            _limits: CompletionLimits,
        ) -> Result<Completion> {
            let text = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))?;
            Ok(Completion {
                text,
                tokens_used: 20,
            })
        }
    }

    /// In-memory file store.
    struct FakeExecutor {
        files: Mutex<HashMap<String, String>>,
    }

    impl FakeExecutor {
        fn with_file(file: &str, contents: &str) -> Arc<Self> {
            let mut files = HashMap::new();
            files.insert(file.to_string(), contents.to_string());
            Arc::new(Self {
                files: Mutex::new(files),
            })
        }
    }

    #[async_trait]
    impl ToolExecutor for FakeExecutor {
        async fn read_file(&self, _workspace: &Path, file: &str) -> Result<String> {
            self.files
                .lock()
                .unwrap()
                .get(file)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such file: {file}"))
        }

        async fn write_file(&self, _workspace: &Path, file: &str, contents: &str) -> Result<()> {
            self.files
                .lock()
                .unwrap()
                .insert(file.to_string(), contents.to_string());
            Ok(())
        }

        async fn run_command(&self, _workspace: &Path, _command: &str) -> Result<CommandOutput> {
            Ok(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    struct FakeWorkspaces;

    #[async_trait]
    impl WorkspaceManager for FakeWorkspaces {
        async fn create(&self, base: &Path, label: &str) -> Result<PathBuf> {
            Ok(base.join(label))
        }

        async fn diff(&self, _workspace: &Path) -> Result<String> {
            Ok("--- a/src/a.rs\n+++ b/src/a.rs\n".into())
        }

        async fn revert(&self, _workspace: &Path, _identity: &str) -> Result<()> {
            Ok(())
        }
    }

    fn crew(client: Arc<ScriptedClient>, executor: Arc<FakeExecutor>) -> CleanupCrew {
        let spec = ModelSpec {
            model: "support".into(),
            max_tokens: 1024,
            temperature: 0.1,
            cost_per_1k_tokens: 0.001,
        };
        CleanupCrew::new(
            client,
            executor,
            Arc::new(FakeWorkspaces),
            spec.clone(),
            spec,
            3,
            20,
            Arc::new(CostTracker::new()),
        )
    }

    fn finding_json(file: &str) -> String {
        serde_json::json!([{
            "severity": "minor",
            "category": "unused-imports",
            "file": file,
            "line": 1,
            "description": "unused import",
            "suggested_fix": "remove it",
        }])
        .to_string()
    }

    fn fix_json(file: &str, contents: &str) -> String {
        serde_json::json!({"file": file, "contents": contents}).to_string()
    }

    #[tokio::test]
    async fn test_clean_first_scan() {
        let client = ScriptedClient::new(&["[]"]);
        let executor = FakeExecutor::with_file("src/a.rs", "fn a() {}\n");
        let report = crew(client, executor)
            .sweep(&PathBuf::from("/ws"), "some diff", "map")
            .await;

        assert!(report.clean);
        assert!(report.complete);
        assert_eq!(report.cycles_run, 1);
        assert_eq!(report.findings_fixed, 0);
    }

    #[tokio::test]
    async fn test_fix_then_clean() {
        let client = ScriptedClient::new(&[
            &finding_json("src/a.rs"),
            &fix_json("src/a.rs", "use std::fmt;\nfn a() {}\n"),
            "[]",
        ]);
        let executor = FakeExecutor::with_file("src/a.rs", "use x::y;\nfn a() {}\n");
        let report = crew(client, Arc::clone(&executor))
            .sweep(&PathBuf::from("/ws"), "diff", "map")
            .await;

        assert!(report.clean);
        assert!(report.complete);
        assert_eq!(report.findings_fixed, 1);
        assert_eq!(report.cycles_run, 2);
        assert!(executor
            .files
            .lock()
            .unwrap()
            .get("src/a.rs")
            .unwrap()
            .contains("std::fmt"));
    }

    #[tokio::test]
    async fn test_oversized_fix_flagged_not_applied() {
        let before = "fn a() {}\n";
        let rewrite: String = (0..40).map(|i| format!("fn f{i}() {{}}\n")).collect();
        let client = ScriptedClient::new(&[
            &finding_json("src/a.rs"),
            &fix_json("src/a.rs", &rewrite),
            "[]",
        ]);
        let executor = FakeExecutor::with_file("src/a.rs", before);
        let report = crew(client, Arc::clone(&executor))
            .sweep(&PathBuf::from("/ws"), "diff", "map")
            .await;

        assert_eq!(report.findings_fixed, 0);
        assert_eq!(report.flagged_for_escalation.len(), 1);
        assert_eq!(report.flagged_for_escalation[0].severity, Severity::Minor);
        // Original contents untouched.
        assert_eq!(
            executor.files.lock().unwrap().get("src/a.rs").unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn test_surgeon_refused_outside_named_file() {
        let client = ScriptedClient::new(&[
            &finding_json("src/a.rs"),
            &fix_json("src/other.rs", "gutted\n"),
            "[]",
        ]);
        let executor = FakeExecutor::with_file("src/a.rs", "fn a() {}\n");
        let report = crew(client, Arc::clone(&executor))
            .sweep(&PathBuf::from("/ws"), "diff", "map")
            .await;

        assert_eq!(report.findings_fixed, 0);
        assert!(report.flagged_for_escalation.is_empty());
        assert!(!executor.files.lock().unwrap().contains_key("src/other.rs"));
    }

    #[tokio::test]
    async fn test_undecodable_scan_marks_incomplete() {
        let client = ScriptedClient::new(&["the code looks pretty good to me"]);
        let executor = FakeExecutor::with_file("src/a.rs", "fn a() {}\n");
        let report = crew(client, executor)
            .sweep(&PathBuf::from("/ws"), "diff", "map")
            .await;

        assert!(!report.clean);
        assert!(!report.complete);
    }

    #[tokio::test]
    async fn test_cycle_budget_exhaustion_marks_incomplete() {
        // Inspector keeps finding the same issue; surgeon keeps "fixing" it.
        let finding = finding_json("src/a.rs");
        let fix = fix_json("src/a.rs", "fn a() {}\n");
        let client = ScriptedClient::new(&[&finding, &fix, &finding, &fix, &finding, &fix]);
        let executor = FakeExecutor::with_file("src/a.rs", "fn a() { }\n");
        let report = crew(client, executor)
            .sweep(&PathBuf::from("/ws"), "diff", "map")
            .await;

        assert_eq!(report.cycles_run, 3);
        assert!(!report.clean);
        assert!(!report.complete);
    }

    #[test]
    fn test_fix_size_counts_changed_lines() {
        assert_eq!(fix_size("a\nb\nc\n", "a\nb\nc\n"), 0);
        assert_eq!(fix_size("a\nb\nc\n", "a\nX\nc\n"), 2); // one removed, one added
        assert_eq!(fix_size("a\n", "a\nb\nc\n"), 2); // two added
        assert_eq!(fix_size("a\nb\n", "b\n"), 1); // one removed
    }
}
