use crate::models::TaskStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("task not found")]
    NotFound,

    #[error("a task with this id already exists")]
    AlreadyExists,

    #[error("expected status in {expected:?}, observed {actual}")]
    StaleState {
        expected: Vec<TaskStatus>,
        actual: TaskStatus,
    },
}
