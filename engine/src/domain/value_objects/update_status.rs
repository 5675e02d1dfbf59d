//! Hot-deploy pipeline status

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage of an in-flight update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStage {
    Initializing,
    FetchingVersion,
    Downloading,
    StartingNew,
    StoppingOld,
    UpdatingVersion,
    Completed,
    Failed,
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateStage::Initializing => "initializing",
            UpdateStage::FetchingVersion => "fetching_version",
            UpdateStage::Downloading => "downloading",
            UpdateStage::StartingNew => "starting_new",
            UpdateStage::StoppingOld => "stopping_old",
            UpdateStage::UpdatingVersion => "updating_version",
            UpdateStage::Completed => "completed",
            UpdateStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status of the at-most-one active update per managed process.
///
/// `completed == true` permits a new update to start; otherwise a concurrent
/// request is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub process_name: String,
    pub update_id: String,
    pub stage: UpdateStage,
    pub progress: f64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed: bool,
}

impl UpdateStatus {
    pub fn new(process_name: impl Into<String>, update_id: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            update_id: update_id.into(),
            stage: UpdateStage::Initializing,
            progress: 0.0,
            message: String::new(),
            error: None,
            completed: false,
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.stage = UpdateStage::Failed;
        self.error = Some(error.into());
        self.completed = true;
    }

    pub fn complete(&mut self, message: impl Into<String>) {
        self.stage = UpdateStage::Completed;
        self.message = message.into();
        self.progress = 100.0;
        self.completed = true;
    }
}
