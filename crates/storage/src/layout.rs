use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// The role a stored object plays in a task's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRole {
    Upload,
    Output,
    Temp,
}

#[derive(Debug, Clone)]
pub struct StorageObject {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub role: ObjectRole,
    pub task_id: String,
}

/// Owns path construction for the three top-level subtrees.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn upload_dir(&self, session_id: &str, task_id: &str) -> PathBuf {
        self.root.join("uploads").join(session_id).join(task_id)
    }

    pub fn output_dir(&self, session_id: &str, task_id: &str) -> PathBuf {
        self.root.join("outputs").join(session_id).join(task_id)
    }

    pub fn temp_dir(&self, task_id: &str) -> PathBuf {
        self.root.join("temp").join(task_id)
    }

    pub fn uploads_root(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn outputs_root(&self) -> PathBuf {
        self.root.join("outputs")
    }

    pub fn temp_root(&self) -> PathBuf {
        self.root.join("temp")
    }
}
