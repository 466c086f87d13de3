use gcbridge_utils::{DomainId, HostRef};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Bridge type registry resolution failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("Host heap error: {0}")]
    Host(#[from] HostError),

    #[error("Domain {0} is not registered")]
    UnknownDomain(DomainId),

    #[error("Bridge callbacks are already installed")]
    AlreadyInstalled,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Bridge type not found: [{assembly}] {namespace}.{name}")]
    TypeNotFound {
        assembly: String,
        namespace: String,
        name: String,
    },
    #[error("Field `{field}` not found on bridge type {type_name}")]
    FieldNotFound { type_name: String, field: String },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HostError {
    #[error("Unable to attach the current thread to the host runtime: {0}")]
    AttachFailed(String),
    #[error("Stale or unknown host handle {0}")]
    InvalidHandle(HostRef),
    #[error("Host allocation failed: {0}")]
    AllocationFailed(&'static str),
    #[error("Host method threw: {0}")]
    Exception(String),
}
