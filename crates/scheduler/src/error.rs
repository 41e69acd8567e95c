use compute_protocol::{DomainError, ErrorKind, JobId};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("cpu_cores and memory_mb must be positive")]
    InvalidRequirements,
    #[error(transparent)]
    Journal(#[from] job_journal::JournalError),
    #[error("job {0} not found")]
    UnknownJob(JobId),
}

impl From<SchedulerError> for DomainError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::InvalidRequirements => {
                DomainError::new(ErrorKind::Validation, err.to_string())
            }
            SchedulerError::UnknownJob(_) => DomainError::new(ErrorKind::NotFound, err.to_string()),
            SchedulerError::Journal(inner) => inner.into(),
        }
    }
}
