use crate::internal::foreign_data::PayloadKind;
use crate::types::enums::SlotType;
use std::ffi::NulError;
use std::str::Utf8Error;
use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("{what} {addr:#x} used after dispose in {operation}")]
    UseAfterDispose {
        what: &'static str,
        addr: usize,
        operation: &'static str,
    },

    #[error("slot {index} is out of range (slot count {count})")]
    SlotOutOfRange { index: usize, count: usize },

    #[error("slot {index} holds {actual:?}, expected {expected:?}")]
    SlotTypeMismatch {
        index: usize,
        expected: SlotType,
        actual: SlotType,
    },

    #[error("foreign object {addr:#x} holds `{actual}`, expected `{expected}`")]
    InvalidForeignType {
        addr: usize,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("foreign object {addr:#x} holds a {actual:?} payload, expected {expected:?}")]
    PayloadKindMismatch {
        addr: usize,
        expected: PayloadKind,
        actual: PayloadKind,
    },

    #[error("foreign object {addr:#x} is not registered")]
    UnknownForeignObject { addr: usize },

    #[error("list index {index} is out of range (count {count})")]
    ListIndexOutOfRange { index: i32, count: usize },

    #[error("{operation} mixes vm {left:#x} with vm {right:#x}")]
    CrossVmMisuse {
        operation: &'static str,
        left: usize,
        right: usize,
    },

    #[error("{what} {addr:#x} is already registered")]
    RegistrationConflict { what: &'static str, addr: usize },

    #[error("Failed to create the native VM")]
    FailedToCreateVm,

    #[error("native VM returned no storage for a new foreign object in slot {index}")]
    ForeignAllocationFailed { index: usize },

    #[error("native VM returned a null handle in {operation}")]
    NullHandle { operation: &'static str },

    #[error("slot {index} holds {actual:?}, which cannot be used as a map key")]
    UnhashableKey { index: usize, actual: SlotType },

    #[error("Module '{0}' is not loaded")]
    ModuleNotFound(String),

    #[error("Variable '{name}' is not defined in module '{module}'")]
    VariableNotFound { module: String, name: String },

    #[error("String conversion error: {0}")]
    StringConversion(#[from] NulError),

    #[error("UTF-8 conversion error: {0}")]
    Utf8Conversion(#[from] Utf8Error),

    #[error("{0}")]
    Script(String),
}

impl BridgeError {
    /// Host programming errors that must stop execution instead of being
    /// reported back to the script.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::UseAfterDispose { .. }
                | BridgeError::CrossVmMisuse { .. }
                | BridgeError::RegistrationConflict { .. }
        )
    }

    /// Shorthand for raising a scripted runtime error from a foreign method.
    pub fn script(message: impl Into<String>) -> Self {
        BridgeError::Script(message.into())
    }
}

/// Stops execution after a host programming error.
#[track_caller]
pub(crate) fn fatal(err: BridgeError) -> ! {
    log::error!("fatal bridge error: {err}");
    panic!("{err}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        let fatal = BridgeError::CrossVmMisuse {
            operation: "set_list_element",
            left: 0x10,
            right: 0x20,
        };
        assert!(fatal.is_fatal());

        let recoverable = BridgeError::SlotTypeMismatch {
            index: 1,
            expected: SlotType::String,
            actual: SlotType::Number,
        };
        assert!(!recoverable.is_fatal());
        assert_eq!(
            recoverable.to_string(),
            "slot 1 holds Number, expected String"
        );
    }

    #[test]
    fn use_after_dispose_message_names_the_operation() {
        let err = BridgeError::UseAfterDispose {
            what: "vm",
            addr: 0xdead,
            operation: "interpret",
        };
        assert_eq!(err.to_string(), "vm 0xdead used after dispose in interpret");
    }
}
