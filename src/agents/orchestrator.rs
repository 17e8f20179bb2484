//! One agent turn: optional plan, edit, validate, apply.
//!
//! ```text
//! Idle ─► (Planning) ─► Editing ─► Validating ─► Applying ─► Done
//!              │            │           │            │
//!              └────────────┴───────────┴────────────┴─────► Failed
//! ```
//!
//! Every turn emits exactly one terminal event. Nothing is retried: a failed
//! turn needs a new user message.

use std::sync::Arc;

use futures::StreamExt;

use super::events::{AgentEvent, EventSink};
use super::plan::Plan;
use super::prompts;
use super::router::{KeywordClassifier, ModelRouter, TaskClassifier, TaskKind};
use crate::config::ModelConfig;
use crate::llm::{ChatOptions, LlmClient};
use crate::patch::{
    normalize_path, Change, Operation, PatchApplier, PatchProposal, PatchValidator, ProposalError,
};
use crate::session::SessionTracker;
use crate::workspace::{WorkspaceFile, WorkspaceStore};

/// Characters of raw model output quoted in parse errors.
const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Idle,
    Planning,
    Editing,
    Validating,
    Applying,
    Done,
    Failed,
}

/// Drives agent turns against a shared workspace and session tracker.
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    workspace: Arc<WorkspaceStore>,
    sessions: SessionTracker,
    classifier: Arc<dyn TaskClassifier>,
    router: ModelRouter,
    max_context_bytes: usize,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        workspace: Arc<WorkspaceStore>,
        sessions: SessionTracker,
        models: ModelConfig,
        max_context_bytes: usize,
    ) -> Self {
        Self {
            llm,
            workspace,
            sessions,
            classifier: Arc::new(KeywordClassifier::default()),
            router: ModelRouter::new(models),
            max_context_bytes,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TaskClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Run one turn, streaming progress to `sink`. Returns `Done` or `Failed`.
    pub async fn run(
        &self,
        session_id: &str,
        user_message: &str,
        files: &[WorkspaceFile],
        sink: &dyn EventSink,
    ) -> AgentPhase {
        let terminal = self.execute(session_id, user_message, files, sink).await;
        let phase = match terminal {
            AgentEvent::Done { .. } => AgentPhase::Done,
            _ => AgentPhase::Failed,
        };
        match &terminal {
            AgentEvent::Done { summary } => {
                tracing::info!(session_id = %session_id, %summary, "Agent turn complete");
            }
            other => {
                tracing::warn!(session_id = %session_id, outcome = other.event_name(), "Agent turn failed");
            }
        }
        sink.emit(terminal);
        phase
    }

    /// Everything up to, but not including, the terminal event.
    async fn execute(
        &self,
        session_id: &str,
        user_message: &str,
        files: &[WorkspaceFile],
        sink: &dyn EventSink,
    ) -> AgentEvent {
        enter(session_id, AgentPhase::Idle);
        self.sessions.get_or_create_session(session_id).await;

        let context = match self.build_context(session_id, files).await {
            Ok(context) => context,
            Err(message) => return AgentEvent::error(message),
        };

        // Planning
        let plan = match self.classifier.classify(user_message) {
            TaskKind::Plan => {
                enter(session_id, AgentPhase::Planning);
                sink.emit(AgentEvent::PlanningStarted);
                match self.plan(&context, user_message).await {
                    Ok(plan) => {
                        sink.emit(AgentEvent::PlanCreated { plan: plan.clone() });
                        Some(plan)
                    }
                    Err(message) => return AgentEvent::error(message),
                }
            }
            TaskKind::Edit => None,
        };

        // Editing
        enter(session_id, AgentPhase::Editing);
        let raw = match self
            .stream_edit(&context, user_message, plan.as_ref(), sink)
            .await
        {
            Ok(raw) => raw,
            Err(message) => return AgentEvent::error(message),
        };

        let proposal = match PatchProposal::parse(&raw) {
            Ok(proposal) => proposal,
            Err(e) => return AgentEvent::error(proposal_error_message(&e, &raw)),
        };
        tracing::debug!(session_id = %session_id, changes = proposal.len(), "Parsed patch proposal");

        if let Some(plan) = &plan {
            let unauthorized = plan.unauthorized_paths(&proposal.changes);
            if !unauthorized.is_empty() {
                return AgentEvent::error(format!(
                    "Agent tried to modify unauthorized files: {}",
                    unauthorized.join(", ")
                ));
            }
        }

        // Validating
        enter(session_id, AgentPhase::Validating);
        sink.emit(AgentEvent::ValidatingPatches {
            count: proposal.len(),
        });
        let validator =
            PatchValidator::new(Arc::clone(&self.workspace), self.sessions.clone(), session_id);
        let validation = validator.validate_proposal(&proposal.changes).await;
        if !validation.is_valid() {
            let errors = validation.messages();
            tracing::warn!(session_id = %session_id, ?errors, "Patch validation failed");
            return AgentEvent::ValidationFailed { errors };
        }

        // Validation guarantees every path normalizes
        let mut changes = Vec::with_capacity(proposal.changes.len());
        for change in proposal.changes {
            match validator.normalize_path(&change.path) {
                Ok(path) => changes.push(Change { path, ..change }),
                Err(e) => return AgentEvent::error(e.to_string()),
            }
        }

        // Applying
        enter(session_id, AgentPhase::Applying);
        let mut applier = PatchApplier::new(Arc::clone(&self.workspace));
        let report = applier
            .apply_changes_with(&changes, |change| {
                sink.emit(AgentEvent::ApplyingPatch {
                    path: change.path.clone(),
                    operation: change.operation.to_string(),
                });
            })
            .await;

        if !report.succeeded() {
            let rollback_errors: Vec<String> = report
                .rollback_failures()
                .map(|r| format!("{}: {}", r.path, r.error.as_deref().unwrap_or("unknown error")))
                .collect();
            if !rollback_errors.is_empty() {
                sink.emit(AgentEvent::RollbackIncomplete {
                    errors: rollback_errors,
                });
            }
            let errors = report
                .failures()
                .map(|r| format!("{}: {}", r.path, r.error.as_deref().unwrap_or("unknown error")))
                .collect();
            return AgentEvent::PatchFailed { errors };
        }

        applier.clear_backups();
        self.record_applied(session_id, &changes).await;

        AgentEvent::Done {
            summary: format!("Applied {} changes successfully", report.results.len()),
        }
    }

    /// Build the prompt context and record every file shown as read.
    ///
    /// Uses the client's files when given, otherwise a bounded workspace snapshot.
    async fn build_context(
        &self,
        session_id: &str,
        files: &[WorkspaceFile],
    ) -> Result<String, String> {
        let shown = if files.is_empty() {
            self.workspace
                .read_all(Some(self.max_context_bytes))
                .await
                .map_err(|e| format!("Failed to read workspace: {}", e))?
        } else {
            let mut shown = Vec::with_capacity(files.len());
            for file in files {
                match normalize_path(self.workspace.root(), &file.name) {
                    Ok(name) => shown.push(WorkspaceFile {
                        name,
                        content: file.content.clone(),
                    }),
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, name = %file.name, error = %e, "Dropping unsafe context file");
                    }
                }
            }
            shown
        };

        for file in &shown {
            self.sessions
                .record_read(session_id, &file.name, &file.content)
                .await;
        }

        Ok(prompts::workspace_context(&self.workspace.list(), &shown))
    }

    async fn plan(&self, context: &str, user_message: &str) -> Result<Plan, String> {
        let model = self.router.select(TaskKind::Plan);
        let raw = self
            .llm
            .complete(
                model,
                &prompts::plan_messages(context, user_message),
                ChatOptions::default(),
            )
            .await
            .map_err(|e| format!("Planning failed: {}", e))?;

        Plan::parse(&raw).map_err(|e| {
            tracing::warn!(error = %e, "Plan did not parse");
            format!("Planning failed: {}", snippet(&raw))
        })
    }

    /// Stream the edit completion, forwarding each delta, and return the full text.
    async fn stream_edit(
        &self,
        context: &str,
        user_message: &str,
        plan: Option<&Plan>,
        sink: &dyn EventSink,
    ) -> Result<String, String> {
        let model = self.router.select(TaskKind::Edit);
        let messages = prompts::edit_messages(context, user_message, plan);
        let mut stream = self
            .llm
            .stream_completion(model, &messages, ChatOptions::default())
            .await
            .map_err(|e| format!("Model request failed: {}", e))?;

        let mut raw = String::new();
        while let Some(delta) = stream.next().await {
            let delta = delta.map_err(|e| format!("Model request failed: {}", e))?;
            raw.push_str(&delta);
            sink.emit(AgentEvent::ModelOutput { delta });
        }
        Ok(raw)
    }

    /// Log applied changes and refresh read baselines so later turns can edit them again.
    async fn record_applied(&self, session_id: &str, changes: &[Change]) {
        for change in changes {
            if change.operation == Operation::Delete {
                self.sessions
                    .record_modify(session_id, &change.path, "", Operation::Delete)
                    .await;
                continue;
            }
            match self.workspace.read(&change.path).await {
                Ok(content) => {
                    self.sessions
                        .record_modify(session_id, &change.path, &content, change.operation.clone())
                        .await;
                    self.sessions
                        .record_read(session_id, &change.path, &content)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, path = %change.path, error = %e, "Could not re-read applied file");
                }
            }
        }
    }
}

fn enter(session_id: &str, phase: AgentPhase) {
    tracing::debug!(session_id = %session_id, phase = ?phase, "Agent phase");
}

fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}

fn proposal_error_message(error: &ProposalError, raw: &str) -> String {
    match error {
        ProposalError::InvalidJson(_) => format!(
            "Model did not return valid JSON. Response: {}",
            snippet(raw)
        ),
        ProposalError::MissingChanges => {
            "Invalid patch proposal: missing 'changes' array".to_string()
        }
        ProposalError::InvalidChange { .. } => format!("Invalid patch proposal: {}", error),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::agents::events::RecordingSink;
    use crate::llm::{ChatMessage, LlmError, TextStream};

    /// Replays canned completions in order, chunked like a real stream.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<String>>,
        models: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                models: Mutex::new(Vec::new()),
            })
        }

        fn models(&self) -> Vec<String> {
            self.models.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn stream_completion(
            &self,
            model: &str,
            _messages: &[ChatMessage],
            _options: ChatOptions,
        ) -> Result<TextStream, LlmError> {
            self.models.lock().unwrap().push(model.to_string());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Network("script exhausted".to_string()))?;
            let chars: Vec<char> = reply.chars().collect();
            let chunks: Vec<Result<String, LlmError>> = chars
                .chunks(16)
                .map(|c| Ok(c.iter().collect::<String>()))
                .collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        workspace: Arc<WorkspaceStore>,
        sessions: SessionTracker,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let workspace = Arc::new(WorkspaceStore::open(dir.path()).await.unwrap());
            Self {
                _dir: dir,
                workspace,
                sessions: SessionTracker::new(),
            }
        }

        fn orchestrator(&self, llm: Arc<ScriptedLlm>) -> Orchestrator {
            Orchestrator::new(
                llm,
                Arc::clone(&self.workspace),
                self.sessions.clone(),
                ModelConfig {
                    plan_model: "planner".to_string(),
                    edit_model: "editor".to_string(),
                },
                200_000,
            )
        }
    }

    fn without_output(names: Vec<&'static str>) -> Vec<&'static str> {
        names.into_iter().filter(|n| *n != "model_output").collect()
    }

    fn file(name: &str, content: &str) -> WorkspaceFile {
        WorkspaceFile {
            name: name.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn creates_file_on_empty_workspace() {
        let h = Harness::new().await;
        let llm = ScriptedLlm::new(&[
            r#"{"changes":[{"path":"a.py","operation":"create","content":"print(1)\n"}]}"#,
        ]);
        let sink = RecordingSink::new();

        let phase = h
            .orchestrator(llm.clone())
            .run("s1", "add a script", &[], &sink)
            .await;

        assert_eq!(phase, AgentPhase::Done);
        assert_eq!(h.workspace.read("a.py").await.unwrap(), "print(1)\n");
        assert_eq!(
            without_output(sink.names()),
            vec!["validating_patches", "applying_patch", "done"]
        );
        match sink.events().last() {
            Some(AgentEvent::Done { summary }) => assert!(summary.contains("1 change")),
            other => panic!("unexpected terminal event: {:?}", other),
        }
        assert_eq!(llm.models(), vec!["editor"]);

        let log = h.sessions.change_log("s1").await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].operation, Operation::Create);
    }

    #[tokio::test]
    async fn streams_model_output_before_validation() {
        let h = Harness::new().await;
        let reply = r#"{"changes":[{"path":"notes.md","operation":"create","content":"hello"}]}"#;
        let llm = ScriptedLlm::new(&[reply]);
        let sink = RecordingSink::new();

        h.orchestrator(llm).run("s1", "write notes", &[], &sink).await;

        let streamed: String = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                AgentEvent::ModelOutput { delta } => Some(delta),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, reply);
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_any_write() {
        let h = Harness::new().await;
        let llm = ScriptedLlm::new(&[
            r#"{"changes":[{"path":"../../etc/passwd","operation":"modify","diff":"@@\n+pwned"}]}"#,
        ]);
        let sink = RecordingSink::new();

        let phase = h.orchestrator(llm).run("s1", "edit it", &[], &sink).await;

        assert_eq!(phase, AgentPhase::Failed);
        match sink.events().last() {
            Some(AgentEvent::ValidationFailed { errors }) => {
                assert_eq!(errors, &vec!["Unsafe path: ../../etc/passwd".to_string()]);
            }
            other => panic!("unexpected terminal event: {:?}", other),
        }
        assert!(h.workspace.list().is_empty());
    }

    #[tokio::test]
    async fn stale_file_fails_validation() {
        let h = Harness::new().await;
        h.workspace.write("b.py", "x=2\n").await.unwrap();
        let llm = ScriptedLlm::new(&[
            r#"{"changes":[{"path":"b.py","operation":"modify","diff":"@@ -1 +1 @@\n-x=1\n+x=3"}]}"#,
        ]);
        let sink = RecordingSink::new();

        // The client showed the model x=1 but disk has since moved on to x=2
        let phase = h
            .orchestrator(llm)
            .run("s1", "bump x", &[file("b.py", "x=1\n")], &sink)
            .await;

        assert_eq!(phase, AgentPhase::Failed);
        match sink.events().last() {
            Some(AgentEvent::ValidationFailed { errors }) => {
                assert_eq!(errors, &vec!["File has changed since last read: b.py".to_string()]);
            }
            other => panic!("unexpected terminal event: {:?}", other),
        }
        assert_eq!(h.workspace.read("b.py").await.unwrap(), "x=2\n");
    }

    #[tokio::test]
    async fn one_invalid_change_rejects_whole_proposal() {
        let h = Harness::new().await;
        let llm = ScriptedLlm::new(&[concat!(
            r#"{"changes":["#,
            r#"{"path":"c.py","operation":"create","content":"ok\n"},"#,
            r#"{"path":"missing.py","operation":"modify","diff":"@@\n+x"}"#,
            r#"]}"#
        )]);
        let sink = RecordingSink::new();

        let phase = h.orchestrator(llm).run("s1", "do two things", &[], &sink).await;

        assert_eq!(phase, AgentPhase::Failed);
        assert_eq!(
            without_output(sink.names()),
            vec!["validating_patches", "validation_failed"]
        );
        assert!(!h.workspace.exists("c.py").await);
        assert!(h.sessions.change_log("s1").await.is_empty());
    }

    #[tokio::test]
    async fn prose_wrapped_json_is_a_parse_error() {
        let h = Harness::new().await;
        let llm = ScriptedLlm::new(&[
            "Sure! ```json {\"changes\":[{\"path\":\"a.py\",\"operation\":\"create\",\"content\":\"x\"}]}```",
        ]);
        let sink = RecordingSink::new();

        let phase = h.orchestrator(llm).run("s1", "add a.py", &[], &sink).await;

        assert_eq!(phase, AgentPhase::Failed);
        assert_eq!(without_output(sink.names()), vec!["error"]);
        match sink.events().last() {
            Some(AgentEvent::Error { message }) => {
                assert!(message.starts_with("Model did not return valid JSON. Response: Sure!"));
            }
            other => panic!("unexpected terminal event: {:?}", other),
        }
        assert!(!h.workspace.exists("a.py").await);
    }

    #[tokio::test]
    async fn missing_changes_array_is_reported() {
        let h = Harness::new().await;
        let llm = ScriptedLlm::new(&[r#"{"edits":[]}"#]);
        let sink = RecordingSink::new();

        h.orchestrator(llm).run("s1", "anything", &[], &sink).await;

        assert_eq!(
            sink.events().last(),
            Some(&AgentEvent::error(
                "Invalid patch proposal: missing 'changes' array"
            ))
        );
    }

    #[tokio::test]
    async fn planned_turn_uses_both_models() {
        let h = Harness::new().await;
        h.workspace.write("main.py", "a\nb\n").await.unwrap();
        let llm = ScriptedLlm::new(&[
            r#"{"files_to_modify":["main.py"],"rationale":"capitalise","estimated_changes":1}"#,
            r#"{"changes":[{"path":"main.py","operation":"modify","diff":"@@ -1,2 +1,2 @@\n-a\n+A\n b"}]}"#,
        ]);
        let sink = RecordingSink::new();

        let phase = h
            .orchestrator(llm.clone())
            .run("s1", "Refactor main.py", &[], &sink)
            .await;

        assert_eq!(phase, AgentPhase::Done);
        assert_eq!(
            without_output(sink.names()),
            vec![
                "planning_started",
                "plan_created",
                "validating_patches",
                "applying_patch",
                "done"
            ]
        );
        assert_eq!(llm.models(), vec!["planner", "editor"]);
        assert_eq!(h.workspace.read("main.py").await.unwrap(), "A\nb\n");
    }

    #[tokio::test]
    async fn unplanned_file_aborts_turn() {
        let h = Harness::new().await;
        h.workspace.write("main.py", "a\n").await.unwrap();
        let llm = ScriptedLlm::new(&[
            r#"{"files_to_modify":["main.py"],"rationale":"","estimated_changes":1}"#,
            r#"{"changes":[{"path":"other.py","operation":"create","content":"x"}]}"#,
        ]);
        let sink = RecordingSink::new();

        let phase = h
            .orchestrator(llm)
            .run("s1", "restructure the project", &[], &sink)
            .await;

        assert_eq!(phase, AgentPhase::Failed);
        assert_eq!(
            sink.events().last(),
            Some(&AgentEvent::error(
                "Agent tried to modify unauthorized files: other.py"
            ))
        );
        assert!(!h.workspace.exists("other.py").await);
    }

    #[tokio::test]
    async fn unparseable_plan_stops_before_editing() {
        let h = Harness::new().await;
        let llm = ScriptedLlm::new(&["I would start by looking at main.py"]);
        let sink = RecordingSink::new();

        let phase = h
            .orchestrator(llm.clone())
            .run("s1", "what approach should we take?", &[], &sink)
            .await;

        assert_eq!(phase, AgentPhase::Failed);
        assert_eq!(sink.names(), vec!["planning_started", "error"]);
        assert_eq!(
            sink.events().last(),
            Some(&AgentEvent::error(
                "Planning failed: I would start by looking at main.py"
            ))
        );
        assert_eq!(llm.models(), vec!["planner"]);
    }

    #[tokio::test]
    async fn apply_failure_rolls_back_earlier_changes() {
        let h = Harness::new().await;
        // A regular file where a directory is needed makes the second create fail at write time
        h.workspace.write("f", "plain file\n").await.unwrap();
        let llm = ScriptedLlm::new(&[concat!(
            r#"{"changes":["#,
            r#"{"path":"ok.py","operation":"create","content":"ok\n"},"#,
            r#"{"path":"f/x.py","operation":"create","content":"nope\n"}"#,
            r#"]}"#
        )]);
        let sink = RecordingSink::new();

        let phase = h.orchestrator(llm).run("s1", "add files", &[], &sink).await;

        assert_eq!(phase, AgentPhase::Failed);
        assert_eq!(
            without_output(sink.names()),
            vec![
                "validating_patches",
                "applying_patch",
                "applying_patch",
                "patch_failed"
            ]
        );
        match sink.events().last() {
            Some(AgentEvent::PatchFailed { errors }) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].starts_with("f/x.py: "));
            }
            other => panic!("unexpected terminal event: {:?}", other),
        }
        assert!(!h.workspace.exists("ok.py").await);
        assert_eq!(h.workspace.read("f").await.unwrap(), "plain file\n");
    }

    /// Records events and swaps `sub/` for a plain file once `trigger` is announced.
    struct SabotageSink {
        inner: RecordingSink,
        root: std::path::PathBuf,
        trigger: &'static str,
    }

    impl EventSink for SabotageSink {
        fn emit(&self, event: AgentEvent) {
            if let AgentEvent::ApplyingPatch { path, .. } = &event {
                if path == self.trigger {
                    std::fs::remove_dir_all(self.root.join("sub")).unwrap();
                    std::fs::write(self.root.join("sub"), "blocker").unwrap();
                }
            }
            self.inner.emit(event);
        }
    }

    #[tokio::test]
    async fn failed_rollback_is_reported_before_patch_failed() {
        let h = Harness::new().await;
        h.workspace.write("sub/a.txt", "original\n").await.unwrap();
        h.workspace.write("f", "plain file\n").await.unwrap();
        let llm = ScriptedLlm::new(&[concat!(
            r#"{"changes":["#,
            r#"{"path":"sub/a.txt","operation":"modify","diff":"@@ -1 +1 @@\n-original\n+changed"},"#,
            r#"{"path":"f/x.py","operation":"create","content":"nope\n"}"#,
            r#"]}"#
        )]);
        let sink = SabotageSink {
            inner: RecordingSink::new(),
            root: h.workspace.root().to_path_buf(),
            trigger: "f/x.py",
        };
        let context = [file("sub/a.txt", "original\n"), file("f", "plain file\n")];

        let phase = h.orchestrator(llm).run("s1", "edit", &context, &sink).await;

        assert_eq!(phase, AgentPhase::Failed);
        assert_eq!(
            without_output(sink.inner.names()),
            vec![
                "validating_patches",
                "applying_patch",
                "applying_patch",
                "rollback_incomplete",
                "patch_failed"
            ]
        );
        let events = sink.inner.events();
        match &events[events.len() - 2] {
            AgentEvent::RollbackIncomplete { errors } => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].starts_with("sub/a.txt: "), "{:?}", errors);
            }
            other => panic!("expected rollback_incomplete, got {:?}", other),
        }
        match events.last() {
            Some(AgentEvent::PatchFailed { errors }) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].starts_with("f/x.py: "));
            }
            other => panic!("unexpected terminal event: {:?}", other),
        }
        assert!(h.sessions.change_log("s1").await.is_empty());
    }

    #[tokio::test]
    async fn applied_files_can_be_modified_next_turn() {
        let h = Harness::new().await;
        h.workspace.write("other.txt", "unrelated\n").await.unwrap();
        let llm = ScriptedLlm::new(&[
            r#"{"changes":[{"path":"a.py","operation":"create","content":"x=1\n"}]}"#,
            r#"{"changes":[{"path":"a.py","operation":"modify","diff":"@@ -1 +1 @@\n-x=1\n+x=2"}]}"#,
        ]);
        let orchestrator = h.orchestrator(llm);
        let context = [file("other.txt", "unrelated\n")];

        let first = RecordingSink::new();
        assert_eq!(
            orchestrator.run("s1", "create a", &context, &first).await,
            AgentPhase::Done
        );

        // a.py is not in the second turn's context; the post-apply read keeps it fresh
        let second = RecordingSink::new();
        assert_eq!(
            orchestrator.run("s1", "bump a", &context, &second).await,
            AgentPhase::Done
        );
        assert_eq!(h.workspace.read("a.py").await.unwrap(), "x=2\n");
        assert_eq!(h.sessions.change_log("s1").await.len(), 2);
    }

    #[tokio::test]
    async fn model_failure_is_an_error_event() {
        let h = Harness::new().await;
        let llm = ScriptedLlm::new(&[]);
        let sink = RecordingSink::new();

        let phase = h.orchestrator(llm).run("s1", "anything", &[], &sink).await;

        assert_eq!(phase, AgentPhase::Failed);
        assert_eq!(sink.names(), vec!["error"]);
    }

    #[tokio::test]
    async fn empty_proposal_is_a_no_op() {
        let h = Harness::new().await;
        let llm = ScriptedLlm::new(&[r#"{"changes":[]}"#]);
        let sink = RecordingSink::new();

        let phase = h.orchestrator(llm).run("s1", "nothing to do", &[], &sink).await;

        assert_eq!(phase, AgentPhase::Done);
        assert_eq!(
            sink.events().last(),
            Some(&AgentEvent::Done {
                summary: "Applied 0 changes successfully".to_string()
            })
        );
    }

    #[tokio::test]
    async fn custom_classifier_controls_planning() {
        struct AlwaysEdit;
        impl TaskClassifier for AlwaysEdit {
            fn classify(&self, _message: &str) -> TaskKind {
                TaskKind::Edit
            }
        }

        let h = Harness::new().await;
        let llm = ScriptedLlm::new(&[r#"{"changes":[]}"#]);
        let sink = RecordingSink::new();

        h.orchestrator(llm.clone())
            .with_classifier(Arc::new(AlwaysEdit))
            .run("s1", "refactor everything", &[], &sink)
            .await;

        assert_eq!(llm.models(), vec!["editor"]);
        assert!(!sink.names().contains(&"planning_started"));
    }
}
