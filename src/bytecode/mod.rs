// SPDX-License-Identifier: MIT OR Apache-2.0

//! Opcode table for the Clear VM's bytecode.
//!
//! Instructions are a one-byte opcode followed by zero or more inline
//! `u8` operands (two for `EXTRACT_FIELD`/`INSERT_FIELD`). The numeric
//! group between `INT_NEG` (0x10) and `NOT` (0x1B), and the comparison
//! group between `INT_LESS` (0x1C) and `EQUAL` (0x20), are packed densely
//! so a single range check can distinguish them from everything else.

/// Opcode byte constants.
pub mod op {
    /// `… → …, const[i]`
    pub const PUSH_CONST: u8 = 0x00;
    /// `… → …, true`
    pub const PUSH_TRUE: u8 = 0x01;
    /// `… → …, false`
    pub const PUSH_FALSE: u8 = 0x02;
    /// `… → …, nil`
    pub const PUSH_NIL: u8 = 0x03;
    /// `…, v → …` (globals[i] := v)
    pub const SET_GLOBAL: u8 = 0x04;
    /// `… → …, globals[i]`
    pub const PUSH_GLOBAL: u8 = 0x05;
    /// `…, v → …` (fp[i] := v)
    pub const SET_LOCAL: u8 = 0x06;
    /// `… → …, fp[i]`
    pub const PUSH_LOCAL: u8 = 0x07;
    /// `…, v → …, int(v)`
    pub const INT: u8 = 0x08;
    /// `…, v → …, bool(v)`
    pub const BOOL: u8 = 0x09;
    /// `…, v → …, num(v)`
    pub const NUM: u8 = 0x0A;
    /// `…, v → …, str(v)`
    pub const STR: u8 = 0x0B;
    /// `… → …, seconds_since_start:num`
    pub const CLOCK: u8 = 0x0C;
    /// `…, s:String → …`
    pub const PRINT: u8 = 0x0D;
    /// `…, v → …` (closes upvalues on the popped slot)
    pub const POP: u8 = 0x0E;
    /// `…, a, b → …, b`
    pub const SQUASH: u8 = 0x0F;
    /// `…, x → …, −x` (int)
    pub const INT_NEG: u8 = 0x10;
    /// `…, x → …, −x` (num)
    pub const NUM_NEG: u8 = 0x11;
    /// `…, a, b → …, a+b` (int)
    pub const INT_ADD: u8 = 0x12;
    /// `…, a, b → …, a+b` (num)
    pub const NUM_ADD: u8 = 0x13;
    /// `…, a, b → …, a−b` (int)
    pub const INT_SUB: u8 = 0x14;
    /// `…, a, b → …, a−b` (num)
    pub const NUM_SUB: u8 = 0x15;
    /// `…, a, b → …, a×b` (int)
    pub const INT_MUL: u8 = 0x16;
    /// `…, a, b → …, a×b` (num)
    pub const NUM_MUL: u8 = 0x17;
    /// `…, a, b → …, a÷b` (int)
    pub const INT_DIV: u8 = 0x18;
    /// `…, a, b → …, a÷b` (num)
    pub const NUM_DIV: u8 = 0x19;
    /// `…, a:Str, b:Str → …, a++b`
    pub const STR_CAT: u8 = 0x1A;
    /// `…, b → …, ¬b`
    pub const NOT: u8 = 0x1B;
    /// `…, a, b → …, (a<b)` (int)
    pub const INT_LESS: u8 = 0x1C;
    /// `…, a, b → …, (a>b)` (int)
    pub const INT_GREATER: u8 = 0x1D;
    /// `…, a, b → …, (a<b)` (num)
    pub const NUM_LESS: u8 = 0x1E;
    /// `…, a, b → …, (a>b)` (num)
    pub const NUM_GREATER: u8 = 0x1F;
    /// `…, a, b → …, a==b`
    pub const EQUAL: u8 = 0x20;
    /// `ip += off`
    pub const JUMP: u8 = 0x21;
    /// pops; `ip += off` if popped = false
    pub const JUMP_IF_FALSE: u8 = 0x22;
    /// `ip −= off`
    pub const LOOP: u8 = 0x23;
    /// `… → …, IP(cur_ip); ip += off`
    pub const FUNCTION: u8 = 0x24;
    /// pops IP and `n` args, sets up a call frame, jumps
    pub const CALL: u8 = 0x25;
    /// `…, IP → …`; `ip := popped`
    pub const LOAD_IP: u8 = 0x26;
    /// `…, FP → …`; `fp := popped`
    pub const LOAD_FP: u8 = 0x27;
    /// `…, v → …`; `return_store := v`
    pub const SET_RETURN: u8 = 0x28;
    /// `… → …, return_store`
    pub const PUSH_RETURN: u8 = 0x29;
    /// `…, f0..fn-1 → …, Struct(fs)`
    pub const STRUCT: u8 = 0x2A;
    /// `…, s:Struct → …, s.fields[d..]`
    pub const DESTRUCT: u8 = 0x2B;
    /// `…, s:Struct → …, s.fields[i]`
    pub const GET_FIELD: u8 = 0x2C;
    /// `…, s@off … → …, s@off …, s.fields[i]`
    pub const EXTRACT_FIELD: u8 = 0x2D;
    /// `…, s, v → …, s` (s.fields[i] := v)
    pub const SET_FIELD: u8 = 0x2E;
    /// `…, s@off, v → …, s@off` (s.fields[i] := v)
    pub const INSERT_FIELD: u8 = 0x2F;
    /// `… → …, Upvalue(→fp[i])`
    pub const REF_LOCAL: u8 = 0x30;
    /// `…, u:Upvalue → …, *u`
    pub const DEREF: u8 = 0x31;
    /// `…, u:Upvalue, v → …`; `*u := v`
    pub const SET_REF: u8 = 0x32;
    /// `…, v → …, v, (tag(v)==t)`
    pub const IS_VAL_TYPE: u8 = 0x33;
    /// `…, v → …, v, (obj_tag(v)==t)`
    pub const IS_OBJ_TYPE: u8 = 0x34;
}

/// Number of defined opcodes; any byte `>= OP_COUNT` is `UnknownOpcode`.
pub const OP_COUNT: u8 = 0x35;

/// Human-readable mnemonic for an opcode byte, used by `debug-trace`/`debug-dis`.
#[must_use]
pub const fn mnemonic(opcode: u8) -> &'static str {
    match opcode {
        op::PUSH_CONST => "PUSH_CONST",
        op::PUSH_TRUE => "PUSH_TRUE",
        op::PUSH_FALSE => "PUSH_FALSE",
        op::PUSH_NIL => "PUSH_NIL",
        op::SET_GLOBAL => "SET_GLOBAL",
        op::PUSH_GLOBAL => "PUSH_GLOBAL",
        op::SET_LOCAL => "SET_LOCAL",
        op::PUSH_LOCAL => "PUSH_LOCAL",
        op::INT => "INT",
        op::BOOL => "BOOL",
        op::NUM => "NUM",
        op::STR => "STR",
        op::CLOCK => "CLOCK",
        op::PRINT => "PRINT",
        op::POP => "POP",
        op::SQUASH => "SQUASH",
        op::INT_NEG => "INT_NEG",
        op::NUM_NEG => "NUM_NEG",
        op::INT_ADD => "INT_ADD",
        op::NUM_ADD => "NUM_ADD",
        op::INT_SUB => "INT_SUB",
        op::NUM_SUB => "NUM_SUB",
        op::INT_MUL => "INT_MUL",
        op::NUM_MUL => "NUM_MUL",
        op::INT_DIV => "INT_DIV",
        op::NUM_DIV => "NUM_DIV",
        op::STR_CAT => "STR_CAT",
        op::NOT => "NOT",
        op::INT_LESS => "INT_LESS",
        op::INT_GREATER => "INT_GREATER",
        op::NUM_LESS => "NUM_LESS",
        op::NUM_GREATER => "NUM_GREATER",
        op::EQUAL => "EQUAL",
        op::JUMP => "JUMP",
        op::JUMP_IF_FALSE => "JUMP_IF_FALSE",
        op::LOOP => "LOOP",
        op::FUNCTION => "FUNCTION",
        op::CALL => "CALL",
        op::LOAD_IP => "LOAD_IP",
        op::LOAD_FP => "LOAD_FP",
        op::SET_RETURN => "SET_RETURN",
        op::PUSH_RETURN => "PUSH_RETURN",
        op::STRUCT => "STRUCT",
        op::DESTRUCT => "DESTRUCT",
        op::GET_FIELD => "GET_FIELD",
        op::EXTRACT_FIELD => "EXTRACT_FIELD",
        op::SET_FIELD => "SET_FIELD",
        op::INSERT_FIELD => "INSERT_FIELD",
        op::REF_LOCAL => "REF_LOCAL",
        op::DEREF => "DEREF",
        op::SET_REF => "SET_REF",
        op::IS_VAL_TYPE => "IS_VAL_TYPE",
        op::IS_OBJ_TYPE => "IS_OBJ_TYPE",
        _ => "UNKNOWN",
    }
}
