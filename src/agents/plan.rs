//! Output of the planning pass.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::patch::Change;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Which files an edit may touch, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub estimated_changes: u64,
}

impl Plan {
    /// Parse the planning model's reply. Must be bare JSON.
    pub fn parse(raw: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Paths in `changes` that the plan did not list, in proposal order.
    pub fn unauthorized_paths<'a>(&self, changes: &'a [Change]) -> Vec<&'a str> {
        changes
            .iter()
            .map(|c| c.path.as_str())
            .filter(|path| {
                let key = plan_key(path);
                !self.files_to_modify.iter().any(|f| plan_key(f) == key)
            })
            .collect()
    }
}

fn plan_key(path: &str) -> &str {
    let mut key = path.trim();
    while let Some(rest) = key.strip_prefix("./") {
        key = rest;
    }
    key
}
