//! Bytecode disassembler
//!
//! Renders instructions into a `String` so callers decide where the text
//! goes: the compiler prints a whole dump after an error-free compile, the
//! VM's execution trace prints one instruction at a time.
//!
//! Layout per instruction: a 4-digit zero-padded offset, then either a
//! 4-wide right-aligned line number or `   | ` when the line repeats the
//! previous instruction's, then the mnemonic; constant-bearing opcodes add
//! the pool index and the quoted constant.

use std::fmt::Write;

use crate::bytecode::{Bytecode, OpCode};

/// Disassemble a whole buffer under a `== name ==` header.
pub fn disassemble_bytecode(bytecode: &Bytecode, name: &str) -> String {
    let mut out = format!("== {name} ==\n");
    let mut offset = 0;
    while offset < bytecode.len() {
        offset = write_instruction(&mut out, bytecode, offset);
    }
    out
}

/// Render the instruction at `offset`, returning the offset of the next one.
pub fn write_instruction(out: &mut String, bytecode: &Bytecode, offset: usize) -> usize {
    let _ = write!(out, "{offset:04} ");
    if offset > 0 && bytecode.line_of(offset) == bytecode.line_of(offset - 1) {
        out.push_str("   | ");
    } else {
        let _ = write!(out, "{:4} ", bytecode.line_of(offset));
    }

    let byte = bytecode.byte(offset);
    let Some(op) = OpCode::from_byte(byte) else {
        let _ = writeln!(out, "Unknown opcode {byte}");
        return offset + 1;
    };

    match op {
        OpCode::Constant
        | OpCode::DefineGlobal
        | OpCode::GetGlobal
        | OpCode::SetGlobal => {
            let index = bytecode.byte(offset + 1) as usize;
            write_constant(out, bytecode, op, index);
            offset + 2
        }
        OpCode::ConstantLong
        | OpCode::DefineGlobalLong
        | OpCode::GetGlobalLong
        | OpCode::SetGlobalLong => {
            let index = bytecode.byte(offset + 1) as usize
                | (bytecode.byte(offset + 2) as usize) << 8
                | (bytecode.byte(offset + 3) as usize) << 16;
            write_constant(out, bytecode, op, index);
            offset + 4
        }
        _ => {
            let _ = writeln!(out, "{}", op.mnemonic());
            offset + 1
        }
    }
}

fn write_constant(out: &mut String, bytecode: &Bytecode, op: OpCode, index: usize) {
    let _ = writeln!(
        out,
        "{:<16}{:<4}'{}'",
        op.mnemonic(),
        index,
        bytecode.constant(index)
    );
}
