//! Stack virtual machine
//!
//! A register-less interpreter over the compiler's bytecode. State is a
//! value stack (capped at [`STACK_MAX`] slots), the instruction pointer, a
//! global name-to-value map, and the list of heap objects this VM has
//! allocated. One `Vm` can interpret any number of sources in sequence;
//! globals carry over, which is what keeps a REPL session alive.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ell_compiler::compile;
use ell_core::intern;
use ell_core::{Bytecode, Object, OpCode, Value};

/// Value stack depth limit; pushing past it is a runtime error.
pub const STACK_MAX: usize = 256;

/// Outcome of [`Vm::interpret`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// A runtime diagnostic: 1-based source line (recovered through the line
/// table from the instruction that failed) plus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error: {}", self.line, self.message)
    }
}

impl std::error::Error for RuntimeError {}

#[derive(Default)]
pub struct Vm {
    stack: Vec<Value>,
    ip: usize,
    globals: HashMap<Box<str>, Value>,
    /// Every object this VM allocated, for teardown. Interned strings are
    /// owned by the pool; entries here are the VM's own strong references
    /// (concatenation results today, non-interned object kinds later).
    objects: Vec<Arc<Object>>,
}

impl Drop for Vm {
    fn drop(&mut self) {
        // Teardown releases this VM's strong references exactly once.
        // Interned strings stay alive through the process-wide pool.
        self.stack.clear();
        self.globals.clear();
        self.objects.clear();
    }
}

impl Vm {
    pub fn new() -> Vm {
        Vm::default()
    }

    /// Compile and run `source`. Compile diagnostics have already been
    /// printed by the compiler; a runtime diagnostic is printed here. The
    /// stack is reset after a runtime error so the VM stays usable.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let bytecode = match compile(source) {
            Ok(bytecode) => bytecode,
            Err(_) => return InterpretResult::CompileError,
        };

        match self.run(&bytecode) {
            Ok(()) => InterpretResult::Ok,
            Err(err) => {
                eprintln!("{err}");
                self.stack.clear();
                InterpretResult::RuntimeError
            }
        }
    }

    /// Execute a compiled buffer from its first byte. Public so embedders
    /// and tests can run hand-assembled bytecode.
    pub fn run(&mut self, bytecode: &Bytecode) -> Result<(), RuntimeError> {
        self.ip = 0;
        loop {
            #[cfg(feature = "trace-execution")]
            self.trace(bytecode);

            let byte = self.read_byte(bytecode)?;
            let Some(op) = OpCode::from_byte(byte) else {
                return Err(self.error(bytecode, format!("Unknown opcode {byte}.")));
            };

            match op {
                OpCode::Constant => {
                    let index = self.read_byte(bytecode)? as usize;
                    self.push(bytecode, bytecode.constant(index).clone())?;
                }
                OpCode::ConstantLong => {
                    let index = self.read_u24(bytecode)?;
                    self.push(bytecode, bytecode.constant(index).clone())?;
                }
                OpCode::Nul => self.push(bytecode, Value::Null)?,
                OpCode::True => self.push(bytecode, Value::Bool(true))?,
                OpCode::False => self.push(bytecode, Value::Bool(false))?,
                OpCode::DefineGlobal => {
                    let index = self.read_byte(bytecode)? as usize;
                    self.define_global(bytecode, index)?;
                }
                OpCode::DefineGlobalLong => {
                    let index = self.read_u24(bytecode)?;
                    self.define_global(bytecode, index)?;
                }
                OpCode::GetGlobal => {
                    let index = self.read_byte(bytecode)? as usize;
                    self.get_global(bytecode, index)?;
                }
                OpCode::GetGlobalLong => {
                    let index = self.read_u24(bytecode)?;
                    self.get_global(bytecode, index)?;
                }
                OpCode::SetGlobal => {
                    let index = self.read_byte(bytecode)? as usize;
                    self.set_global(bytecode, index)?;
                }
                OpCode::SetGlobalLong => {
                    let index = self.read_u24(bytecode)?;
                    self.set_global(bytecode, index)?;
                }
                OpCode::Add | OpCode::Subtract | OpCode::Multiply | OpCode::Divide => {
                    self.arithmetic(bytecode, op)?;
                }
                OpCode::Negate => {
                    let value = self.pop(bytecode)?;
                    let negated = match value {
                        Value::Int(n) => Value::Int(n.wrapping_neg()),
                        Value::Double(d) => Value::Double(-d),
                        _ => return Err(self.error(bytecode, "Operand must be a number.")),
                    };
                    self.push(bytecode, negated)?;
                }
                OpCode::Not => {
                    let value = self.pop(bytecode)?;
                    let Value::Bool(b) = value else {
                        return Err(self.error(bytecode, "Operand must be a boolean value."));
                    };
                    self.push(bytecode, Value::Bool(!b))?;
                }
                OpCode::Equal => {
                    let b = self.pop(bytecode)?;
                    let a = self.pop(bytecode)?;
                    self.push(bytecode, Value::Bool(a == b))?;
                }
                OpCode::NotEqual => {
                    let b = self.pop(bytecode)?;
                    let a = self.pop(bytecode)?;
                    self.push(bytecode, Value::Bool(a != b))?;
                }
                OpCode::Greater | OpCode::GreaterEqual | OpCode::Less | OpCode::LessEqual => {
                    self.comparison(bytecode, op)?;
                }
                OpCode::Pop => {
                    self.pop(bytecode)?;
                }
                OpCode::Return => return Ok(()),
            }
        }
    }

    /// Current value of a global, if defined. Lets embedders observe the
    /// environment between `interpret` calls.
    pub fn get_global_value(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    // Instruction helpers

    fn read_byte(&mut self, bytecode: &Bytecode) -> Result<u8, RuntimeError> {
        if self.ip >= bytecode.len() {
            return Err(RuntimeError {
                line: bytecode.line_of(bytecode.len().saturating_sub(1)),
                message: "Unexpected end of bytecode.".to_string(),
            });
        }
        let byte = bytecode.byte(self.ip);
        self.ip += 1;
        Ok(byte)
    }

    fn read_u24(&mut self, bytecode: &Bytecode) -> Result<usize, RuntimeError> {
        let b0 = self.read_byte(bytecode)? as usize;
        let b1 = self.read_byte(bytecode)? as usize;
        let b2 = self.read_byte(bytecode)? as usize;
        Ok(b0 | b1 << 8 | b2 << 16)
    }

    /// Line of the byte just consumed, for diagnostics.
    fn current_line(&self, bytecode: &Bytecode) -> u32 {
        bytecode.line_of(self.ip.saturating_sub(1))
    }

    fn error(&self, bytecode: &Bytecode, message: impl Into<String>) -> RuntimeError {
        RuntimeError {
            line: self.current_line(bytecode),
            message: message.into(),
        }
    }

    fn push(&mut self, bytecode: &Bytecode, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= STACK_MAX {
            return Err(self.error(bytecode, "Stack overflow."));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self, bytecode: &Bytecode) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| self.error(bytecode, "Stack underflow."))
    }

    fn peek(&self, bytecode: &Bytecode) -> Result<&Value, RuntimeError> {
        self.stack
            .last()
            .ok_or_else(|| self.error(bytecode, "Stack underflow."))
    }

    // Globals. The name operand is an interned string parked in the
    // constant pool by the compiler.

    fn define_global(&mut self, bytecode: &Bytecode, index: usize) -> Result<(), RuntimeError> {
        let name = bytecode.constant(index).as_string().to_string();
        let value = self.peek(bytecode)?.clone();
        self.globals.insert(name.into_boxed_str(), value);
        self.pop(bytecode)?;
        Ok(())
    }

    fn get_global(&mut self, bytecode: &Bytecode, index: usize) -> Result<(), RuntimeError> {
        let name = bytecode.constant(index).as_string();
        match self.globals.get(name) {
            Some(value) => {
                let value = value.clone();
                self.push(bytecode, value)
            }
            None => Err(self.error(bytecode, format!("Undefined variable '{name}'."))),
        }
    }

    fn set_global(&mut self, bytecode: &Bytecode, index: usize) -> Result<(), RuntimeError> {
        let name = bytecode.constant(index).as_string();
        if !self.globals.contains_key(name) {
            return Err(self.error(bytecode, format!("Undefined variable '{name}'.")));
        }
        // Assignment is an expression: the value stays on the stack.
        let value = self.peek(bytecode)?.clone();
        self.globals.insert(Box::from(name), value);
        Ok(())
    }

    // Binary operators

    /// Numeric rules: Int op Int stays Int, any Double operand promotes
    /// both sides to Double. `+` additionally concatenates when either side
    /// is a string, stringifying the other.
    fn arithmetic(&mut self, bytecode: &Bytecode, op: OpCode) -> Result<(), RuntimeError> {
        let b = self.pop(bytecode)?;
        let a = self.pop(bytecode)?;

        let result = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => self.int_arithmetic(bytecode, op, *x, *y)?,
            (Value::Double(x), Value::Double(y)) => Value::Double(double_arithmetic(op, *x, *y)),
            (Value::Int(x), Value::Double(y)) => {
                Value::Double(double_arithmetic(op, f64::from(*x), *y))
            }
            (Value::Double(x), Value::Int(y)) => {
                Value::Double(double_arithmetic(op, *x, f64::from(*y)))
            }
            _ if op == OpCode::Add && (a.is_string() || b.is_string()) => {
                let joined = format!("{}{}", a.to_text(), b.to_text());
                let obj = intern::intern(&joined);
                self.objects.push(Arc::clone(&obj));
                Value::Obj(obj)
            }
            _ => {
                return Err(self.error(
                    bytecode,
                    "Operator plus is not supported for this type.",
                ));
            }
        };
        self.push(bytecode, result)
    }

    fn int_arithmetic(
        &self,
        bytecode: &Bytecode,
        op: OpCode,
        x: i32,
        y: i32,
    ) -> Result<Value, RuntimeError> {
        let result = match op {
            OpCode::Add => x.wrapping_add(y),
            OpCode::Subtract => x.wrapping_sub(y),
            OpCode::Multiply => x.wrapping_mul(y),
            OpCode::Divide => {
                if y == 0 {
                    return Err(self.error(bytecode, "Division by zero."));
                }
                x.wrapping_div(y)
            }
            _ => unreachable!("not an arithmetic opcode: {op:?}"),
        };
        Ok(Value::Int(result))
    }

    /// Same coercion as arithmetic; only numbers are ordered.
    fn comparison(&mut self, bytecode: &Bytecode, op: OpCode) -> Result<(), RuntimeError> {
        let b = self.pop(bytecode)?;
        let a = self.pop(bytecode)?;

        let result = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => int_comparison(op, *x, *y),
            (Value::Double(x), Value::Double(y)) => double_comparison(op, *x, *y),
            (Value::Int(x), Value::Double(y)) => double_comparison(op, f64::from(*x), *y),
            (Value::Double(x), Value::Int(y)) => double_comparison(op, *x, f64::from(*y)),
            _ => {
                return Err(self.error(
                    bytecode,
                    "Operator plus is not supported for this type.",
                ));
            }
        };
        self.push(bytecode, Value::Bool(result))
    }

    #[cfg(feature = "trace-execution")]
    fn trace(&self, bytecode: &Bytecode) {
        use std::fmt::Write as _;

        if self.ip >= bytecode.len() {
            return;
        }
        let mut text = String::from("           ");
        for slot in &self.stack {
            let _ = write!(text, "[ {slot} ]");
        }
        text.push('\n');
        ell_core::disasm::write_instruction(&mut text, bytecode, self.ip);
        print!("{text}");
    }
}

fn double_arithmetic(op: OpCode, x: f64, y: f64) -> f64 {
    match op {
        OpCode::Add => x + y,
        OpCode::Subtract => x - y,
        OpCode::Multiply => x * y,
        OpCode::Divide => x / y,
        _ => unreachable!("not an arithmetic opcode: {op:?}"),
    }
}

fn int_comparison(op: OpCode, x: i32, y: i32) -> bool {
    match op {
        OpCode::Greater => x > y,
        OpCode::GreaterEqual => x >= y,
        OpCode::Less => x < y,
        OpCode::LessEqual => x <= y,
        _ => unreachable!("not a comparison opcode: {op:?}"),
    }
}

fn double_comparison(op: OpCode, x: f64, y: f64) -> bool {
    match op {
        OpCode::Greater => x > y,
        OpCode::GreaterEqual => x >= y,
        OpCode::Less => x < y,
        OpCode::LessEqual => x <= y,
        _ => unreachable!("not a comparison opcode: {op:?}"),
    }
}
