//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical opcode table and invokes a callback macro for code generation, so
//! the opcode numbers, mnemonics and operand counts live in exactly one place.
//!
//! This module generates:
//! - The [`Instruction`] enum with opcode mappings
//! - `TryFrom<Cell>` for decoding opcodes fetched from the image
//! - `From<Instruction> for Cell` for building images
//!
//! # Image encoding
//!
//! Every instruction occupies one cell holding its opcode. `LIT`, `CALL`,
//! `JUMP` and the four conditional jumps are followed by one operand cell
//! (a literal or an absolute address). Stack effects below use Forth notation,
//! `before - after`, top of stack rightmost.

use crate::virtual_machine::Cell;
use crate::virtual_machine::errors::VMError;

/// Invokes a callback macro with the complete instruction definition list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Stack
            // =========================
            /// NOP ; no effect
            Nop = 0, "NOP", 0,
            /// LIT n ; - n
            Lit = 1, "LIT", 1,
            /// DUP ; n - n n
            Dup = 2, "DUP", 0,
            /// DROP ; n -
            Drop = 3, "DROP", 0,
            /// SWAP ; x y - y x
            Swap = 4, "SWAP", 0,
            /// PUSH ; n - (address: - n)
            Push = 5, "PUSH", 0,
            /// POP ; - n (address: n -)
            Pop = 6, "POP", 0,
            // =========================
            // Control flow
            // =========================
            /// CALL addr ; (address: - ip+1)
            Call = 7, "CALL", 1,
            /// JUMP addr ; unconditional
            Jump = 8, "JUMP", 1,
            /// RETURN ; (address: a -) resume at a+1
            Return = 9, "RETURN", 0,
            /// GT_JUMP addr ; x y - ; jump if x > y
            GtJump = 10, "GT_JUMP", 1,
            /// LT_JUMP addr ; x y - ; jump if x < y
            LtJump = 11, "LT_JUMP", 1,
            /// NE_JUMP addr ; x y - ; jump if x != y
            NeJump = 12, "NE_JUMP", 1,
            /// EQ_JUMP addr ; x y - ; jump if x == y
            EqJump = 13, "EQ_JUMP", 1,
            // =========================
            // Memory
            // =========================
            /// FETCH ; a - n
            Fetch = 14, "FETCH", 0,
            /// STORE ; n a -
            Store = 15, "STORE", 0,
            // =========================
            // Arithmetic / bitwise
            // =========================
            /// ADD ; x y - x+y
            Add = 16, "ADD", 0,
            /// SUB ; x y - x-y
            Sub = 17, "SUB", 0,
            /// MUL ; x y - x*y
            Mul = 18, "MUL", 0,
            /// DIVMOD ; x y - x%y x/y
            DivMod = 19, "DIVMOD", 0,
            /// AND ; x y - x&y
            And = 20, "AND", 0,
            /// OR ; x y - x|y
            Or = 21, "OR", 0,
            /// XOR ; x y - x^y
            Xor = 22, "XOR", 0,
            /// SHL ; x y - x<<y
            Shl = 23, "SHL", 0,
            /// SHR ; x y - x>>y (logical)
            Shr = 24, "SHR", 0,
            /// ZERO_EXIT ; n - n | 0 - (return)
            ZeroExit = 25, "ZERO_EXIT", 0,
            /// INC ; n - n+1
            Inc = 26, "INC", 0,
            /// DEC ; n - n-1
            Dec = 27, "DEC", 0,
            // =========================
            // Ports
            // =========================
            /// IN ; - byte (blocks on host input)
            In = 28, "IN", 0,
            /// OUT ; n -
            Out = 29, "OUT", 0,
            /// WAIT ; output barrier / host handshake
            Wait = 30, "WAIT", 0,
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal, $operands:literal
        ),* $(,)?
    ) => {
        /// Machine opcodes, numbered as they appear in image cells.
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        #[repr(i32)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<Cell> for Instruction {
            type Error = VMError;

            #[inline(always)]
            fn try_from(value: Cell) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(VMError::InvalidOpcode { opcode: value }),
                }
            }
        }

        impl Instruction {
            /// Every instruction in opcode order.
            pub const ALL: &'static [Instruction] = &[ $( Instruction::$name, )* ];

            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }

            /// Number of operand cells following the opcode cell.
            pub const fn operand_cells(&self) -> usize {
                match self {
                    $( Instruction::$name => $operands, )*
                }
            }
        }
    };
}

for_each_instruction!(define_instructions);

impl From<Instruction> for Cell {
    fn from(instr: Instruction) -> Cell {
        instr as Cell
    }
}
