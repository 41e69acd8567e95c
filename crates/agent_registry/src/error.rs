use compute_protocol::{AgentId, DomainError, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent {0} not found")]
    UnknownAgent(AgentId),
    #[error("assignment request to agent {agent_id} failed: {source}")]
    AssignmentFailed {
        agent_id: AgentId,
        #[source]
        source: compute_bus::BusError,
    },
}

impl From<RegistryError> for DomainError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownAgent(_) => DomainError::new(ErrorKind::NotFound, err.to_string()),
            RegistryError::AssignmentFailed { .. } => {
                DomainError::new(ErrorKind::Transient, err.to_string())
            }
        }
    }
}
