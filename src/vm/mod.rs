// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dispatch loop and operation handlers.
//!
//! `Vm` owns every piece of mutable execution state (stack, globals, heap,
//! constants, code, ip). `execute_code` loads the constant pool, positions
//! `ip` at the start of the code segment, and runs the dispatch loop until
//! `ip == end` or a handler returns an error.

#[cfg(test)]
mod vm_test;

use std::time::Instant;

#[cfg(any(feature = "debug-trace", feature = "debug-dis"))]
use crate::bytecode::mnemonic;
use crate::bytecode::{op, OP_COUNT};
use crate::constants::load_constants;
use crate::error::VmError;
use crate::globals::Globals;
use crate::heap::{Heap, HeapObject, UpvalueState};
use crate::stack::EvalStack;
use crate::value::Value;

#[cfg(feature = "debug-mem")]
use crate::heap::AllocStats;

/// The VM's full execution state.
pub struct Vm {
    stack: EvalStack,
    globals: Globals,
    heap: Heap,
    constants: Vec<Value>,
    code: Vec<u8>,
    start: usize,
    end: usize,
    ip: usize,
    return_store: Value,
    start_time: Instant,
    output: Vec<u8>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Create a VM with empty state, ready to load a module via `execute_code`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: EvalStack::new(),
            globals: Globals::new(),
            heap: Heap::new(),
            constants: Vec::new(),
            code: Vec::new(),
            start: 0,
            end: 0,
            ip: 0,
            return_store: Value::Nil,
            start_time: Instant::now(),
            output: Vec::new(),
        }
    }

    /// Bytes written by `OP_PRINT` so far, in program order.
    #[must_use]
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Allocation counters, only meaningful under the `debug-mem` feature.
    #[cfg(feature = "debug-mem")]
    #[must_use]
    pub fn heap_stats(&self) -> AllocStats {
        self.heap.stats()
    }

    /// Load `bytes` as a module (header + code) and run it to completion.
    ///
    /// # Errors
    /// Any `VmError` surfaced by loading the header or by a handler during
    /// execution; output already written via `OP_PRINT` remains in `output()`.
    pub fn execute_code(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        let (constants, code_start) = load_constants(bytes, &mut self.heap)?;
        self.constants = constants;
        self.code = bytes.to_vec();
        self.start = code_start;
        self.end = bytes.len();
        self.ip = code_start;
        self.start_time = Instant::now();
        self.run()
    }

    fn run(&mut self) -> Result<(), VmError> {
        while self.ip < self.end {
            self.step()?;
        }
        Ok(())
    }

    fn fetch_u8(&mut self) -> Result<u8, VmError> {
        let byte = *self
            .code
            .get(self.ip)
            .ok_or(VmError::TruncatedInstruction)?;
        self.ip += 1;
        Ok(byte)
    }

    fn jump_to(&mut self, target: usize) -> Result<(), VmError> {
        if target < self.start || target > self.end {
            return Err(VmError::JumpOutOfRange);
        }
        self.ip = target;
        Ok(())
    }

    fn step(&mut self) -> Result<(), VmError> {
        let opcode = self.fetch_u8()?;

        #[cfg(feature = "debug-trace")]
        tracing::trace!(ip = self.ip - 1, op = mnemonic(opcode), sp = self.stack.sp(), "dispatch");

        #[cfg(feature = "debug-dis")]
        tracing::debug!(ip = self.ip - 1, "{:04x}  {}", self.ip - 1, mnemonic(opcode));

        #[cfg(feature = "debug-stack")]
        tracing::trace!(stack = ?self.stack.as_slice(), "stack");

        match opcode {
            op::PUSH_CONST => {
                let i = self.fetch_u8()?;
                let value = *self
                    .constants
                    .get(i as usize)
                    .ok_or(VmError::ConstantIndexOutOfRange(i))?;
                self.stack.push(value)?;
            }
            op::PUSH_TRUE => self.stack.push(Value::Bool(true))?,
            op::PUSH_FALSE => self.stack.push(Value::Bool(false))?,
            op::PUSH_NIL => self.stack.push(Value::Nil)?,
            op::SET_GLOBAL => {
                let i = self.fetch_u8()?;
                let value = self.stack.pop()?;
                self.globals.set(i, value);
            }
            op::PUSH_GLOBAL => {
                let i = self.fetch_u8()?;
                self.stack.push(self.globals.get(i)?)?;
            }
            op::SET_LOCAL => {
                let i = self.fetch_u8()?;
                let value = self.stack.pop()?;
                self.stack.set_local(i, value)?;
            }
            op::PUSH_LOCAL => {
                let i = self.fetch_u8()?;
                self.stack.push(self.stack.get_local(i)?)?;
            }
            op::INT => self.cast_top(cast_int)?,
            op::BOOL => self.cast_top(cast_bool)?,
            op::NUM => self.cast_top(cast_num)?,
            op::STR => self.cast_str_top()?,
            op::CLOCK => {
                self.stack.push(Value::Num(self.start_time.elapsed().as_secs_f64()))?;
            }
            op::PRINT => self.print()?,
            op::POP => self.pop_and_close_upvalues()?,
            op::SQUASH => {
                let b = self.stack.pop()?;
                self.stack.pop()?;
                self.stack.push(b)?;
            }
            op::INT_NEG => {
                let x = int_operand(self.stack.pop()?);
                self.stack.push(Value::Int(x.wrapping_neg()))?;
            }
            op::NUM_NEG => {
                let x = num_operand(self.stack.pop()?);
                self.stack.push(Value::Num(-x))?;
            }
            op::INT_ADD => self.int_binop(i32::wrapping_add)?,
            op::NUM_ADD => self.num_binop(|a, b| a + b)?,
            op::INT_SUB => self.int_binop(i32::wrapping_sub)?,
            op::NUM_SUB => self.num_binop(|a, b| a - b)?,
            op::INT_MUL => self.int_binop(i32::wrapping_mul)?,
            op::NUM_MUL => self.num_binop(|a, b| a * b)?,
            op::INT_DIV => self.int_binop(|a, b| a.checked_div(b).unwrap_or(0))?,
            op::NUM_DIV => self.num_binop(|a, b| a / b)?,
            op::STR_CAT => self.str_cat()?,
            op::NOT => {
                let b = self.stack.pop()?;
                let negated = match b {
                    Value::Bool(v) => !v,
                    other => other.is_false(),
                };
                self.stack.push(Value::Bool(negated))?;
            }
            op::INT_LESS => self.int_compare(|a, b| a < b)?,
            op::INT_GREATER => self.int_compare(|a, b| a > b)?,
            op::NUM_LESS => self.num_compare(|a, b| a < b)?,
            op::NUM_GREATER => self.num_compare(|a, b| a > b)?,
            op::EQUAL => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(Value::Bool(values_equal(a, b)))?;
            }
            op::JUMP => {
                let off = self.fetch_u8()?;
                self.jump_to(self.ip + off as usize)?;
            }
            op::JUMP_IF_FALSE => {
                let off = self.fetch_u8()?;
                let v = self.stack.pop()?;
                if v.is_false() {
                    self.jump_to(self.ip + off as usize)?;
                }
            }
            op::LOOP => {
                let off = self.fetch_u8()?;
                let target = self.ip.checked_sub(off as usize).ok_or(VmError::JumpOutOfRange)?;
                self.jump_to(target)?;
            }
            op::FUNCTION => {
                let off = self.fetch_u8()?;
                let entry = self.ip;
                self.stack.push(Value::Ip(u32::try_from(entry).expect("code fits in u32")))?;
                self.jump_to(entry + off as usize)?;
            }
            op::CALL => {
                let n = self.fetch_u8()?;
                self.call(n)?;
            }
            op::LOAD_IP => {
                let v = self.stack.pop()?;
                let Value::Ip(target) = v else { return Err(VmError::NonIpLoad) };
                self.jump_to(target as usize)?;
            }
            op::LOAD_FP => {
                let v = self.stack.pop()?;
                let Value::Fp(target) = v else { return Err(VmError::NonFpLoad) };
                self.stack.set_fp(target as usize);
            }
            op::SET_RETURN => {
                self.return_store = self.stack.pop()?;
            }
            op::PUSH_RETURN => self.stack.push(self.return_store)?,
            op::STRUCT => {
                let n = self.fetch_u8()?;
                let fields = self.stack.pop_n(n as usize)?;
                let handle = self.heap.alloc_struct(fields);
                self.stack.push(Value::Obj(handle))?;
            }
            op::DESTRUCT => {
                let d = self.fetch_u8()?;
                let v = self.stack.pop()?;
                let fields = self.struct_fields(v)?;
                if d as usize > fields.len() {
                    return Err(VmError::FieldOutOfRange { index: d, field_count: fields.len() });
                }
                let rest = fields[d as usize..].to_vec();
                self.stack.push_n(&rest)?;
            }
            op::GET_FIELD => {
                let i = self.fetch_u8()?;
                let v = self.stack.pop()?;
                let fields = self.struct_fields(v)?;
                let field = *fields
                    .get(i as usize)
                    .ok_or(VmError::FieldOutOfRange { index: i, field_count: fields.len() })?;
                self.stack.push(field)?;
            }
            op::EXTRACT_FIELD => {
                let off = self.fetch_u8()?;
                let i = self.fetch_u8()?;
                let v = self.stack.peek(off as usize)?;
                let fields = self.struct_fields(v)?;
                let field = *fields
                    .get(i as usize)
                    .ok_or(VmError::FieldOutOfRange { index: i, field_count: fields.len() })?;
                self.stack.push(field)?;
            }
            op::SET_FIELD => {
                let i = self.fetch_u8()?;
                let value = self.stack.pop()?;
                let s = self.stack.peek(0)?;
                self.write_field(s, i, value)?;
            }
            op::INSERT_FIELD => {
                let off = self.fetch_u8()?;
                let i = self.fetch_u8()?;
                let value = self.stack.pop()?;
                let s = self.stack.peek(off as usize)?;
                self.write_field(s, i, value)?;
            }
            op::REF_LOCAL => {
                let i = self.fetch_u8()?;
                self.stack.get_local(i)?;
                let slot = self.stack.local_slot(i);
                let handle = self.heap.alloc_upvalue(slot);
                self.stack.link_upvalue(slot, handle);
                self.stack.push(Value::Obj(handle))?;
            }
            op::DEREF => {
                let v = self.stack.pop()?;
                let Value::Obj(handle) = v else { return Err(VmError::NonUpvalueDeref) };
                let HeapObject::Upvalue(state) = self.heap.get(handle) else {
                    return Err(VmError::NonUpvalueDeref);
                };
                let value = match *state {
                    UpvalueState::Open { slot } => self.stack.get_slot(slot),
                    UpvalueState::Closed { value } => value,
                };
                self.stack.push(value)?;
            }
            op::SET_REF => {
                let value = self.stack.pop()?;
                let u = self.stack.pop()?;
                let Value::Obj(handle) = u else { return Err(VmError::NonUpvalueDeref) };
                let HeapObject::Upvalue(state) = self.heap.get(handle) else {
                    return Err(VmError::NonUpvalueDeref);
                };
                match *state {
                    UpvalueState::Open { slot } => self.stack.set_slot(slot, value),
                    UpvalueState::Closed { .. } => {
                        if let HeapObject::Upvalue(s) = self.heap.get_mut(handle) {
                            *s = UpvalueState::Closed { value };
                        }
                    }
                }
            }
            op::IS_VAL_TYPE => {
                let t = self.fetch_u8()?;
                let v = self.stack.peek(0)?;
                self.stack.push(Value::Bool(v.tag() as u8 == t))?;
            }
            op::IS_OBJ_TYPE => {
                let t = self.fetch_u8()?;
                let v = self.stack.peek(0)?;
                let matches = matches!(v, Value::Obj(handle) if self.heap.tag_of(handle) as u8 == t);
                self.stack.push(Value::Bool(matches))?;
            }
            _ if opcode < OP_COUNT => unreachable!("opcode {opcode:#04x} declared but not dispatched"),
            other => return Err(VmError::UnknownOpcode(other)),
        }

        Ok(())
    }

    fn cast_top(&mut self, cast: impl Fn(Value) -> Result<Value, VmError>) -> Result<(), VmError> {
        let v = self.stack.pop()?;
        self.stack.push(cast(v)?)
    }

    fn cast_str_top(&mut self) -> Result<(), VmError> {
        let v = self.stack.pop()?;
        let value = cast_str(v, &mut self.heap)?;
        self.stack.push(value)
    }

    fn print(&mut self) -> Result<(), VmError> {
        let v = self.stack.pop()?;
        let Value::Obj(handle) = v else { return Err(VmError::NonStringPrint) };
        let HeapObject::String(bytes) = self.heap.get(handle) else {
            return Err(VmError::NonStringPrint);
        };
        self.output.extend_from_slice(bytes);
        self.output.push(b'\n');
        Ok(())
    }

    fn pop_and_close_upvalues(&mut self) -> Result<(), VmError> {
        let slot = self.stack.top_index()?;
        let value = self.stack.pop()?;
        for handle in self.stack.take_upvalues_at(slot) {
            self.heap.close_upvalue(handle, value);
        }
        Ok(())
    }

    fn int_binop(&mut self, f: impl Fn(i32, i32) -> i32) -> Result<(), VmError> {
        let b = int_operand(self.stack.pop()?);
        let a = int_operand(self.stack.pop()?);
        self.stack.push(Value::Int(f(a, b)))
    }

    fn num_binop(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), VmError> {
        let b = num_operand(self.stack.pop()?);
        let a = num_operand(self.stack.pop()?);
        self.stack.push(Value::Num(f(a, b)))
    }

    fn int_compare(&mut self, f: impl Fn(i32, i32) -> bool) -> Result<(), VmError> {
        let b = int_operand(self.stack.pop()?);
        let a = int_operand(self.stack.pop()?);
        self.stack.push(Value::Bool(f(a, b)))
    }

    fn num_compare(&mut self, f: impl Fn(f64, f64) -> bool) -> Result<(), VmError> {
        let b = num_operand(self.stack.pop()?);
        let a = num_operand(self.stack.pop()?);
        self.stack.push(Value::Bool(f(a, b)))
    }

    fn str_cat(&mut self) -> Result<(), VmError> {
        let b = self.stack.pop()?;
        let a = self.stack.pop()?;
        let (Value::Obj(ah), Value::Obj(bh)) = (a, b) else {
            return Err(VmError::NonStringConcat);
        };
        let (HeapObject::String(abytes), HeapObject::String(bbytes)) =
            (self.heap.get(ah), self.heap.get(bh))
        else {
            return Err(VmError::NonStringConcat);
        };
        let mut combined = Vec::with_capacity(abytes.len() + bbytes.len());
        combined.extend_from_slice(abytes);
        combined.extend_from_slice(bbytes);
        let handle = self.heap.intern_string(combined);
        self.stack.push(Value::Obj(handle))
    }

    fn call(&mut self, n: u8) -> Result<(), VmError> {
        let callee = self.stack.pop()?;
        let Value::Ip(target) = callee else { return Err(VmError::NonFunctionCall) };
        let args = self.stack.pop_n(n as usize)?;
        self.stack.push(Value::Ip(u32::try_from(self.ip).expect("code fits in u32")))?;
        self.stack.push(Value::Fp(self.stack.fp() as u16))?;
        self.stack.set_fp(self.stack.sp());
        self.jump_to(target as usize)?;
        self.stack.push_n(&args)
    }

    fn struct_fields(&self, v: Value) -> Result<&[Value], VmError> {
        let Value::Obj(handle) = v else { return Err(VmError::NonStructField) };
        match self.heap.get(handle) {
            HeapObject::Struct(fields) => Ok(fields),
            _ => Err(VmError::NonStructField),
        }
    }

    fn write_field(&mut self, s: Value, i: u8, value: Value) -> Result<(), VmError> {
        let Value::Obj(handle) = s else { return Err(VmError::NonStructField) };
        let HeapObject::Struct(fields) = self.heap.get_mut(handle) else {
            return Err(VmError::NonStructField);
        };
        let slot = fields
            .get_mut(i as usize)
            .ok_or(VmError::FieldOutOfRange { index: i, field_count: fields.len() })?;
        *slot = value;
        Ok(())
    }
}

/// Extract an `Int` payload; mistyped operands are unspecified but must not crash (§4.7).
const fn int_operand(v: Value) -> i32 {
    match v {
        Value::Int(n) => n,
        _ => 0,
    }
}

/// Extract a `Num` payload; mistyped operands are unspecified but must not crash (§4.7).
const fn num_operand(v: Value) -> f64 {
    match v {
        Value::Num(n) => n,
        _ => 0.0,
    }
}

fn values_equal(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Num(x), Value::Num(y)) => (x - y).abs() < 1e-7,
        // Interning guarantees byte-equal strings share an ObjRef, so identity
        // comparison already implements "String compares by bytes".
        (Value::Obj(x), Value::Obj(y)) => x == y,
        (Value::Ip(x), Value::Ip(y)) => x == y,
        (Value::Fp(x), Value::Fp(y)) => x == y,
        _ => false,
    }
}

fn cast_int(v: Value) -> Result<Value, VmError> {
    match v {
        Value::Int(n) => Ok(Value::Int(n)),
        // `as` float-to-int casts in Rust saturate to the target range and map NaN to 0,
        // which is exactly the policy chosen for out-of-range/NaN Num->Int casts (§9).
        Value::Num(n) => Ok(Value::Int(n as i32)),
        Value::Bool(b) => Ok(Value::Int(i32::from(b))),
        Value::Nil => Ok(Value::Int(0)),
        Value::Obj(_) | Value::Ip(_) | Value::Fp(_) => Err(VmError::InvalidCast { op: "INT" }),
    }
}

fn cast_bool(v: Value) -> Result<Value, VmError> {
    match v {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::Int(n) => Ok(Value::Bool(n != 0)),
        Value::Num(n) => Ok(Value::Bool(n != 0.0)),
        Value::Nil => Ok(Value::Bool(false)),
        Value::Obj(_) | Value::Ip(_) | Value::Fp(_) => Err(VmError::InvalidCast { op: "BOOL" }),
    }
}

fn cast_num(v: Value) -> Result<Value, VmError> {
    match v {
        Value::Num(n) => Ok(Value::Num(n)),
        Value::Int(n) => Ok(Value::Num(f64::from(n))),
        Value::Bool(b) => Ok(Value::Num(if b { 1.0 } else { 0.0 })),
        Value::Nil => Ok(Value::Num(0.0)),
        Value::Obj(_) | Value::Ip(_) | Value::Fp(_) => Err(VmError::InvalidCast { op: "NUM" }),
    }
}

fn cast_str(v: Value, heap: &mut Heap) -> Result<Value, VmError> {
    let rendered: Vec<u8> = match v {
        Value::Obj(handle) if matches!(heap.get(handle), HeapObject::String(_)) => {
            return Ok(Value::Obj(handle));
        }
        Value::Int(n) => n.to_string().into_bytes(),
        Value::Num(n) => format!("{n:.7}").into_bytes(),
        Value::Bool(true) => b"true".to_vec(),
        Value::Bool(false) => b"false".to_vec(),
        Value::Nil => b"nil".to_vec(),
        Value::Obj(_) | Value::Ip(_) | Value::Fp(_) => {
            return Err(VmError::InvalidCast { op: "STR" });
        }
    };
    Ok(Value::Obj(heap.intern_string(rendered)))
}
