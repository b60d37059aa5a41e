// SPDX-License-Identifier: MIT OR Apache-2.0

//! Constant-pool loader (module header, §4.3).
//!
//! The header is `N:u8` followed by `N` tagged constant records. Interned
//! strings are allocated into the heap as part of loading, so the returned
//! pool can be indexed directly by `OP_PUSH_CONST`.


use crate::decode::Cursor;
use crate::error::VmError;
use crate::heap::Heap;
use crate::value::Value;

const CONST_INT: u8 = 0x00;
const CONST_NUM: u8 = 0x01;
const CONST_STR: u8 = 0x02;

/// Load the constant pool from the start of `bytes`.
///
/// Returns the loaded pool and the byte offset at which code begins.
///
/// # Errors
/// `TruncatedHeader` on any short read; `UnknownConstantTag` on an
/// unrecognized record tag.
pub fn load_constants(bytes: &[u8], heap: &mut Heap) -> Result<(Vec<Value>, usize), VmError> {
    let mut cursor = Cursor::new(bytes);
    let count = cursor.read_u8().ok_or(VmError::TruncatedHeader)?;

    let mut pool = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let tag = cursor.read_u8().ok_or(VmError::TruncatedHeader)?;
        let value = match tag {
            CONST_INT => {
                let n = cursor.read_i32().ok_or(VmError::TruncatedHeader)?;
                Value::Int(n)
            }
            CONST_NUM => {
                let n = cursor.read_f64().ok_or(VmError::TruncatedHeader)?;
                Value::Num(n)
            }
            CONST_STR => {
                let bytes = cursor
                    .read_len_prefixed_bytes()
                    .ok_or(VmError::TruncatedHeader)?;
                let handle = heap.intern_string(bytes.to_vec());
                Value::Obj(handle)
            }
            other => return Err(VmError::UnknownConstantTag(other)),
        };
        pool.push(value);
    }

    Ok((pool, cursor.pos()))
}
