use compute_protocol::{DomainError, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("resource {0} not found")]
    UnknownResource(compute_protocol::ResourceId),
    #[error("allocation {0} not found")]
    UnknownAllocation(compute_protocol::AllocationId),
    #[error("insufficient capacity on dimension(s) for resource {resource_id}")]
    InsufficientCapacity {
        resource_id: compute_protocol::ResourceId,
    },
}

impl From<LedgerError> for DomainError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownResource(_) | LedgerError::UnknownAllocation(_) => {
                DomainError::new(ErrorKind::NotFound, err.to_string())
            }
            LedgerError::InsufficientCapacity { .. } => {
                DomainError::new(ErrorKind::Conflict, err.to_string())
            }
        }
    }
}
