use thiserror::Error;

use crate::heap::Register;
use crate::resource::ResourceType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    #[error("bytecode fault in script {script} at {offset:04x}: {reason}")]
    BytecodeFault {
        script: u16,
        offset: usize,
        reason: String,
    },
    #[error("invalid reference {0}")]
    InvalidReference(Register),
    #[error("selector {selector} not found on object {object}")]
    SelectorNotFound { object: Register, selector: u16 },
    #[error("resource {0:?}.{1:03} not found")]
    ResourceMissing(ResourceType, u16),
    #[error("list iteration nested deeper than {0} levels")]
    RecursionLimitExceeded(usize),
    #[error("unknown kernel function {0:#x}")]
    UnknownKernelFunction(u16),
    #[error("kernel function {0} is not implemented")]
    MissingKernelFunction(String),
    #[error("heap corruption: {0}")]
    HeapCorruption(String),
    #[error("invalid script {script}: {reason}")]
    InvalidScript { script: u16, reason: String },
    #[error("invalid {0:?}.{1:03}: {2}")]
    InvalidResource(ResourceType, u16, String),
    #[error("operand stack underflow")]
    StackUnderflow,
}

impl VmError {
    /// Errors that stop the running process. Anything else is logged by the kernel
    /// dispatcher and the call returns a neutral value.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            VmError::InvalidReference(_) | VmError::SelectorNotFound { .. }
        )
    }
}

pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_reference_prints_segment_and_offset() {
        let err = VmError::InvalidReference(Register::new(3, 0x1f));
        assert_eq!(err.to_string(), "invalid reference 0003:001f");
        assert!(!err.is_fatal());
    }

    #[test]
    fn heap_corruption_is_fatal() {
        assert!(VmError::HeapCorruption("node is not a node".into()).is_fatal());
        assert!(VmError::RecursionLimitExceeded(4).is_fatal());
    }
}
