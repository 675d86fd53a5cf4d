use crate::virtual_machine::Cell;
use crate::virtual_machine::stack::StackKind;

/// Errors that can occur while loading an image or executing it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VMError {
    /// Boot payload does not fit in the requested capacity.
    #[error("boot image of {len} cells does not fit in an image of {capacity} cells")]
    ImageTooLarge { len: usize, capacity: usize },
    /// Requested capacity cannot be addressed by a cell.
    #[error("image capacity {capacity} is not addressable by a 32-bit cell")]
    InvalidCapacity { capacity: usize },
    /// Memory access or instruction pointer outside the image.
    #[error("address {addr} out of bounds (image holds {capacity} cells)")]
    OutOfBounds { addr: i64, capacity: usize },
    /// Push onto a full stack.
    #[error("{stack} stack overflow (capacity {capacity})")]
    StackOverflow { stack: StackKind, capacity: usize },
    /// Pop or peek on a stack holding too few values.
    #[error("{stack} stack underflow")]
    StackUnderflow { stack: StackKind },
    /// Fetched cell is not a defined opcode.
    #[error("invalid opcode {opcode}")]
    InvalidOpcode { opcode: Cell },
    /// DIVMOD with a zero divisor.
    #[error("division by zero")]
    DivisionByZero,
    /// Boot image file could not be decoded into cells.
    #[error("malformed image: {reason}")]
    MalformedImage { reason: String },
    /// Host I/O failure while loading an image.
    #[error("io error: {reason}")]
    Io { reason: String },
}

impl From<std::io::Error> for VMError {
    fn from(err: std::io::Error) -> Self {
        VMError::Io {
            reason: err.to_string(),
        }
    }
}

/// A fatal condition raised while executing, tagged with the instruction
/// pointer of the instruction that raised it.
///
/// Once a fault is returned the machine is halted and cannot be resumed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fault at ip {ip}: {error}")]
pub struct Fault {
    /// Address of the faulting instruction.
    pub ip: Cell,
    /// What went wrong.
    #[source]
    pub error: VMError,
}
