use compute_protocol::{DomainError, ErrorKind, JobId};

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("job {0} not found")]
    UnknownJob(JobId),
    #[error("job {job_id} submitter mismatch")]
    Forbidden { job_id: JobId },
    #[error("job {job_id} cannot transition from {from:?} to {to:?}")]
    InvalidTransition {
        job_id: JobId,
        from: compute_protocol::JobState,
        to: compute_protocol::JobState,
    },
}

impl From<JournalError> for DomainError {
    fn from(err: JournalError) -> Self {
        match err {
            JournalError::UnknownJob(_) => DomainError::new(ErrorKind::NotFound, err.to_string()),
            JournalError::Forbidden { .. } => DomainError::new(ErrorKind::Forbidden, err.to_string()),
            JournalError::InvalidTransition { .. } => {
                DomainError::new(ErrorKind::Internal, err.to_string())
            }
        }
    }
}
