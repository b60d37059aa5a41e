// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heap for the Clear VM.
//!
//! A flat arena of heap objects addressed by a dense handle (`ObjRef`),
//! the target-language rendering of the source's raw-pointer object list
//! (see `DESIGN.md`). There is no garbage collector: every object lives
//! until the `Heap` itself is dropped, at VM teardown. Strings are
//! deduplicated through a byte-keyed intern table.


use std::collections::HashMap;

use crate::value::{ObjTag, Value};

/// A handle to a heap-allocated object: a dense index into the object arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

impl ObjRef {
    /// Raw index into the arena, for diagnostics/tests.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The lifecycle state of an upvalue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueState {
    /// Still referencing a live stack slot.
    Open {
        /// Absolute index into the evaluation stack's slot array.
        slot: usize,
    },
    /// Has captured its own copy; the backing slot may since have been reused.
    Closed {
        /// The captured value.
        value: Value,
    },
}

/// A heap-allocated object.
// `Eq` is not derived: `Struct`/`Upvalue` transitively hold a `Value::Num(f64)`,
// same as `UpvalueState` above.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    /// An interned, immutable byte string.
    String(Box<[u8]>),
    /// A fixed-arity mutable slot array.
    Struct(Vec<Value>),
    /// A capture cell, open or closed.
    Upvalue(UpvalueState),
}

impl HeapObject {
    /// The object-tag byte for `OP_IS_OBJ_TYPE`.
    #[must_use]
    pub const fn tag(&self) -> ObjTag {
        match self {
            Self::String(_) => ObjTag::String,
            Self::Struct(_) => ObjTag::Struct,
            Self::Upvalue(_) => ObjTag::Upvalue,
        }
    }
}

/// Per-allocation bookkeeping, active only under the `debug-mem` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllocStats {
    /// Number of objects ever allocated (interning hits do not count).
    pub objects: usize,
    /// Approximate bytes owned by allocated objects.
    pub bytes: usize,
}

/// The VM's object arena and string intern table.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
    intern: HashMap<Box<[u8]>, ObjRef>,
    #[cfg(feature = "debug-mem")]
    stats: AllocStats,
}

impl Heap {
    /// Create an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, obj: HeapObject) -> ObjRef {
        let handle = ObjRef(u32::try_from(self.objects.len()).expect("heap arena exhausted"));
        self.objects.push(obj);
        handle
    }

    /// Intern a byte string, allocating only on the first occurrence of its bytes.
    pub fn intern_string(&mut self, bytes: Vec<u8>) -> ObjRef {
        if let Some(existing) = self.intern.get(bytes.as_slice()) {
            return *existing;
        }
        let boxed: Box<[u8]> = bytes.into_boxed_slice();
        #[cfg(feature = "debug-mem")]
        {
            self.stats.objects += 1;
            self.stats.bytes += boxed.len();
        }
        let handle = self.push(HeapObject::String(boxed.clone()));
        self.intern.insert(boxed, handle);
        handle
    }

    /// Allocate a new struct with the given fields (field count fixed at creation).
    pub fn alloc_struct(&mut self, fields: Vec<Value>) -> ObjRef {
        #[cfg(feature = "debug-mem")]
        {
            self.stats.objects += 1;
            self.stats.bytes += fields.len() * std::mem::size_of::<Value>();
        }
        self.push(HeapObject::Struct(fields))
    }

    /// Allocate a new open upvalue referencing the given stack slot.
    pub fn alloc_upvalue(&mut self, slot: usize) -> ObjRef {
        #[cfg(feature = "debug-mem")]
        {
            self.stats.objects += 1;
            self.stats.bytes += std::mem::size_of::<UpvalueState>();
        }
        self.push(HeapObject::Upvalue(UpvalueState::Open { slot }))
    }

    /// Borrow an object by handle.
    #[must_use]
    pub fn get(&self, handle: ObjRef) -> &HeapObject {
        &self.objects[handle.index()]
    }

    /// Mutably borrow an object by handle.
    pub fn get_mut(&mut self, handle: ObjRef) -> &mut HeapObject {
        &mut self.objects[handle.index()]
    }

    /// The object-tag of the referenced object.
    #[must_use]
    pub fn tag_of(&self, handle: ObjRef) -> ObjTag {
        self.get(handle).tag()
    }

    /// Close an open upvalue, copying `value` into its own storage.
    ///
    /// No-op if the upvalue is already closed: an upvalue closes at most once,
    /// so a second close must not clobber the value captured by the first.
    pub fn close_upvalue(&mut self, handle: ObjRef, value: Value) {
        if let HeapObject::Upvalue(state) = self.get_mut(handle) {
            if matches!(state, UpvalueState::Open { .. }) {
                *state = UpvalueState::Closed { value };
            }
        }
    }

    /// Current allocation statistics (only meaningful under `debug-mem`).
    #[cfg(feature = "debug-mem")]
    #[must_use]
    pub const fn stats(&self) -> AllocStats {
        self.stats
    }
}
