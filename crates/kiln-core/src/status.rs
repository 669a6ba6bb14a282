//! Status codes and the jump-target chain
//!
//! Every fallible operation in the runtime reports a [`Status`]. Shallow APIs
//! simply return it. Deep APIs additionally record it in the tier-1 status cell
//! and hand control back to the most recently pushed [`JumpTarget`] by
//! short-circuiting with `?` up to the enclosing [`JumpStack`] frame.

use thiserror::Error;

/// Runtime status codes
///
/// The numeric codes are stable and are used across the native module
/// boundary (see [`Status::code`] and [`Status::from_code`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(u32)]
pub enum Status {
    /// No error
    #[error("no error")]
    NoError = 0,

    /// An argument has the wrong type
    #[error("argument type invalid")]
    ArgumentTypeInvalid = 1,

    /// Wrong number of arguments
    #[error("number of arguments invalid")]
    NumberOfArgumentsInvalid = 2,

    /// An argument is outside its valid range
    #[error("argument out of range")]
    ArgumentOutOfRange = 3,

    /// An argument has an invalid value
    #[error("argument value invalid")]
    ArgumentValueInvalid = 4,

    /// The requested method does not exist
    #[error("method not found")]
    MethodNotFound = 5,

    /// An allocation could not be satisfied
    #[error("allocation failed")]
    AllocationFailed = 6,

    /// A runtime self-test failed
    #[error("runtime test failed")]
    RuntimeTestFailed = 7,

    /// Lexical error reported by a front-end
    #[error("lexical error")]
    LexicalError = 8,

    /// Syntactical error reported by a front-end
    #[error("syntactical error")]
    SyntacticalError = 9,

    /// Semantical error reported by a front-end
    #[error("semantical error")]
    SemanticalError = 10,

    /// The operation is not valid in the current state
    #[error("operation invalid")]
    OperationInvalid = 11,

    /// Code that must never run was reached
    #[error("unreachable code reached")]
    UnreachableCodeReached = 12,

    /// Stack capacity exceeded
    #[error("stack overflow")]
    StackOverflow = 13,

    /// Pop from an empty stack
    #[error("stack underflow")]
    StackUnderflow = 14,

    /// Stack index beyond the current stack
    #[error("stack index out of bounds")]
    StackIndexOutOfBounds = 15,

    /// Push/pop nesting was violated
    #[error("stack corruption")]
    StackCorruption = 16,

    /// Division by zero
    #[error("division by zero")]
    DivisionByZero = 17,

    /// Malformed encoding
    #[error("invalid encoding")]
    InvalidEncoding = 18,

    /// The host environment failed
    #[error("environment failed")]
    EnvironmentFailed = 19,

    /// A conversion failed
    #[error("conversion failed")]
    ConversionFailed = 20,

    /// The entity does not exist
    #[error("not exists")]
    NotExists = 21,

    /// The entity already exists
    #[error("exists")]
    Exists = 22,

    /// The type has no dispatch table
    #[error("dispatch not exists")]
    DispatchNotExists = 23,

    /// The dispatch slot is not populated
    #[error("method not implemented")]
    MethodNotImplemented = 24,

    /// A counter or value overflowed
    #[error("overflow")]
    Overflow = 25,

    /// A counter or value underflowed
    #[error("underflow")]
    Underflow = 26,

    /// The entity is locked
    #[error("locked")]
    Locked = 27,

    /// A lock could not be acquired
    #[error("lock failed")]
    LockFailed = 28,

    /// The operation was aborted
    #[error("aborted")]
    Aborted = 29,

    /// The value cannot be represented
    #[error("not representable")]
    NotRepresentable = 30,
}

impl Status {
    const ALL: [Status; 31] = [
        Status::NoError,
        Status::ArgumentTypeInvalid,
        Status::NumberOfArgumentsInvalid,
        Status::ArgumentOutOfRange,
        Status::ArgumentValueInvalid,
        Status::MethodNotFound,
        Status::AllocationFailed,
        Status::RuntimeTestFailed,
        Status::LexicalError,
        Status::SyntacticalError,
        Status::SemanticalError,
        Status::OperationInvalid,
        Status::UnreachableCodeReached,
        Status::StackOverflow,
        Status::StackUnderflow,
        Status::StackIndexOutOfBounds,
        Status::StackCorruption,
        Status::DivisionByZero,
        Status::InvalidEncoding,
        Status::EnvironmentFailed,
        Status::ConversionFailed,
        Status::NotExists,
        Status::Exists,
        Status::DispatchNotExists,
        Status::MethodNotImplemented,
        Status::Overflow,
        Status::Underflow,
        Status::Locked,
        Status::LockFailed,
        Status::Aborted,
        Status::NotRepresentable,
    ];

    /// Get the stable numeric code
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decode a numeric code
    pub fn from_code(code: u32) -> Option<Status> {
        Self::ALL.get(code as usize).copied()
    }

    /// Check whether this is the `NoError` status
    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, Status::NoError)
    }

    /// Turn a status code into a `Result`
    pub fn into_result(self) -> KilnResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::NoError
    }
}

/// Result type used throughout the runtime
pub type KilnResult<T> = Result<T, Status>;

/// A pushed recovery frame
///
/// Frames are identified by their depth in the chain. A frame is only valid
/// until it is popped or unwound past.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a pushed jump target must be popped"]
pub struct JumpTarget {
    depth: usize,
}

impl JumpTarget {
    /// Depth of this frame in the chain (1 for the outermost frame)
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// LIFO chain of recovery frames
#[derive(Debug, Default)]
pub struct JumpStack {
    depth: usize,
}

impl JumpStack {
    /// Create an empty chain
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Push a new frame
    pub fn push(&mut self) -> JumpTarget {
        self.depth += 1;
        JumpTarget { depth: self.depth }
    }

    /// Pop the top frame
    ///
    /// Fails with `StackCorruption` if `target` is not the most recent frame.
    pub fn pop(&mut self, target: JumpTarget) -> KilnResult<()> {
        if target.depth != self.depth || self.depth == 0 {
            return Err(Status::StackCorruption);
        }
        self.depth -= 1;
        Ok(())
    }

    /// Discard every frame above `depth`
    ///
    /// This is how a jump skips frames that were pushed but never popped.
    pub fn unwind_to(&mut self, depth: usize) {
        if depth < self.depth {
            self.depth = depth;
        }
    }

    /// Current number of frames
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Check whether any frame is pushed
    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }
}
