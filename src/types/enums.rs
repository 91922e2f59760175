use num_enum::{FromPrimitive, IntoPrimitive};
use wren_interop_sys::*;

/// Outcome of `interpret` and `call`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum InterpretResult {
    Success = WrenInterpretResult_WREN_RESULT_SUCCESS,
    CompileError = WrenInterpretResult_WREN_RESULT_COMPILE_ERROR,
    #[num_enum(default)]
    RuntimeError = WrenInterpretResult_WREN_RESULT_RUNTIME_ERROR,
}

impl InterpretResult {
    pub fn is_success(self) -> bool {
        self == InterpretResult::Success
    }
}

/// Kind of diagnostic reported through the error listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum ErrorKind {
    Compile = WrenErrorType_WREN_ERROR_COMPILE,
    #[num_enum(default)]
    Runtime = WrenErrorType_WREN_ERROR_RUNTIME,
    StackTrace = WrenErrorType_WREN_ERROR_STACK_TRACE,
}

/// Runtime type of the value in a slot, as reported by the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum SlotType {
    Bool = WrenType_WREN_TYPE_BOOL,
    Number = WrenType_WREN_TYPE_NUM,
    Foreign = WrenType_WREN_TYPE_FOREIGN,
    List = WrenType_WREN_TYPE_LIST,
    Map = WrenType_WREN_TYPE_MAP,
    Null = WrenType_WREN_TYPE_NULL,
    String = WrenType_WREN_TYPE_STRING,
    #[num_enum(default)]
    Unknown = WrenType_WREN_TYPE_UNKNOWN,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_codes_map_to_enums() {
        assert_eq!(
            InterpretResult::from(WrenInterpretResult_WREN_RESULT_COMPILE_ERROR),
            InterpretResult::CompileError
        );
        assert_eq!(ErrorKind::from(WrenErrorType_WREN_ERROR_STACK_TRACE), ErrorKind::StackTrace);
        assert_eq!(SlotType::from(WrenType_WREN_TYPE_MAP), SlotType::Map);
        assert_eq!(u32::from(SlotType::String), WrenType_WREN_TYPE_STRING);
    }

    #[test]
    fn unexpected_codes_fall_back() {
        assert_eq!(SlotType::from(99), SlotType::Unknown);
        assert_eq!(InterpretResult::from(99), InterpretResult::RuntimeError);
    }
}
