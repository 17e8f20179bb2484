//! System instructions and prompt assembly for the planning and edit passes.

use std::fmt::Write as _;

use super::plan::Plan;
use crate::llm::ChatMessage;
use crate::workspace::WorkspaceFile;

pub const EDIT_SYSTEM_PROMPT: &str = r#"You are an expert software engineer operating inside a real codebase.

CRITICAL RULES:
- You CANNOT write files directly
- You can ONLY propose changes
- Output ONLY valid JSON - no markdown, no prose, no explanations
- All file modifications must be expressed as structured patches

The workspace file listing and the contents of the relevant files are provided
in the conversation. Paths are relative to the workspace root.

Output Format (REQUIRED):
{
  "changes": [
    {
      "path": "relative/path/to/file.py",
      "operation": "modify",
      "diff": "unified diff format here"
    }
  ]
}

Operations:
1. "modify" - Modify existing file
   - Requires: "diff" field with unified diff format
   - Example diff format:
     @@ -1,3 +1,4 @@
      from utils import greet
     -print(greet("World"))
     +try:
     +    print(greet("World"))
     +except Exception as e:
     +    print(f"Error: {e}")

2. "create" - Create new file
   - Requires: "content" field with full file contents

3. "delete" - Delete existing file
   - No additional fields required

Example Response:
{
  "changes": [
    {
      "path": "main.py",
      "operation": "modify",
      "diff": "@@ -1,2 +1,5 @@\n from utils import greet\n-print(greet(\"World\"))\n+try:\n+    print(greet(\"World\"))\n+except Exception as e:\n+    print(f\"Error: {e}\")"
    }
  ]
}

REMEMBER: Output ONLY JSON. No explanations. No markdown blocks. Just pure JSON."#;

pub const PLAN_SYSTEM_PROMPT: &str = r#"You are in planning mode. You create execution plans WITHOUT making code changes.

Your job: analyze the request and the provided workspace, then output a JSON plan.

Output Format (REQUIRED):
{
  "files_to_modify": ["file1.py", "file2.py"],
  "rationale": "Brief explanation of approach and why these files",
  "estimated_changes": 2
}

Rules:
- Output ONLY JSON - no prose, no markdown
- List every file that will be modified, created or deleted
- Be specific about which files need changes
- Explain the high-level approach

Example:
{
  "files_to_modify": ["main.py", "utils.py"],
  "rationale": "Add error handling to main.py and create helper function in utils.py for retry logic",
  "estimated_changes": 2
}"#;

/// Render the workspace listing plus file contents for the model.
pub fn workspace_context(listing: &[String], files: &[WorkspaceFile]) -> String {
    let mut out = String::from("Workspace files:\n");
    if listing.is_empty() {
        out.push_str("(empty workspace)\n");
    }
    for name in listing {
        let _ = writeln!(out, "- {}", name);
    }

    for file in files {
        let _ = write!(out, "\n--- {} ---\n{}", file.name, file.content);
        if !file.content.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// User turn for the edit pass, carrying the approved plan when there is one.
pub fn edit_request(user_message: &str, plan: Option<&Plan>) -> String {
    match plan {
        Some(plan) => {
            let plan_json = serde_json::to_string(plan).unwrap_or_default();
            format!(
                "Plan: {}\n\nUser request: {}\n\nOnly modify files listed in the plan: {}\n\nImplement this plan with patches.",
                plan_json,
                user_message,
                plan.files_to_modify.join(", ")
            )
        }
        None => user_message.to_string(),
    }
}

pub fn plan_messages(context: &str, user_message: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(PLAN_SYSTEM_PROMPT),
        ChatMessage::user(context),
        ChatMessage::user(user_message),
    ]
}

pub fn edit_messages(context: &str, user_message: &str, plan: Option<&Plan>) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(EDIT_SYSTEM_PROMPT),
        ChatMessage::user(context),
        ChatMessage::user(edit_request(user_message, plan)),
    ]
}
