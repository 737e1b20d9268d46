//! Ell Runtime Library
//!
//! The stack virtual machine that executes compiled Ell bytecode. A [`Vm`]
//! owns the value stack and the global environment; `interpret` runs one
//! source string through the compiler and the dispatch loop, and a single
//! `Vm` can do that repeatedly with globals intact (the REPL relies on it).

pub mod vm;

pub use vm::{InterpretResult, RuntimeError, STACK_MAX, Vm};
