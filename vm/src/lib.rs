pub mod class;
pub mod dictionary;
pub mod dispatch;
pub mod error;
pub mod interpreter;
pub mod primitives;
pub mod special;
pub mod stack;

use std::collections::HashMap;
use std::sync::Arc;

use bytecode::CompiledMethod;
use object::{HeaderFlags, MemorySettings, ObjectFormat, ObjectMemory, Value};
use parking_lot::Mutex;

pub use class::{ClassSlot, InstanceSpec};
pub use dictionary::MethodDictionary;
pub use dispatch::{DoesNotUnderstandHandler, MethodKind};
pub use error::VmError;
pub use primitives::{FromValue, IntoValue, NativeFn, NativeMethodDescriptor};
pub use special::{SpecialObjects, class_index};
pub use stack::{ExecutionContext, FrameFlags, FrameMetadata, StackMemory, StackRegistry};

/// VM construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct VmSettings {
    pub memory: MemorySettings,
    /// Size in bytes of each execution context's stack.
    pub stack_size: usize,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            memory: MemorySettings::default(),
            stack_size: 64 * 1024,
        }
    }
}

/// A VM shared between OS threads. Holding the lock serializes allocation
/// and class mutation.
pub type SharedVm = Arc<Mutex<VM>>;

/// The VM owns the object memory, the class table and the bootstrapped
/// special objects.
pub struct VM {
    pub memory: ObjectMemory,
    pub special: SpecialObjects,
    /// Class objects by class index. Free entries hold nil.
    pub class_table: Vec<Value>,
    /// Interned symbols: Rust string → heap Symbol Value.
    pub intern_table: HashMap<String, Value>,
    /// Native method bodies, indexed by NativeMethod objects.
    pub natives: Vec<NativeFn>,
    /// Symbols of the special selector bytecodes, in table order.
    pub special_selectors: Vec<Value>,
    pub stacks: StackRegistry,
    pub settings: VmSettings,
    does_not_understand: Option<DoesNotUnderstandHandler>,
}

impl VM {
    pub fn new(settings: VmSettings) -> Result<Self, VmError> {
        special::bootstrap(settings)
    }

    pub fn into_shared(self) -> SharedVm {
        Arc::new(Mutex::new(self))
    }

    #[inline]
    pub fn nil(&self) -> Value {
        self.special.nil
    }

    #[inline]
    pub fn boolean(&self, b: bool) -> Value {
        if b {
            self.special.true_obj
        } else {
            self.special.false_obj
        }
    }

    /// The unique Symbol spelled `name`.
    pub fn intern(&mut self, name: &str) -> Result<Value, VmError> {
        if let Some(&symbol) = self.intern_table.get(name) {
            return Ok(symbol);
        }
        let symbol =
            self.memory
                .allocate_bytes(name.as_bytes(), ObjectFormat::Indexable8, class_index::SYMBOL)?;
        self.memory.set_header_flags(symbol, HeaderFlags::IMMUTABLE)?;
        self.intern_table.insert(name.to_string(), symbol);
        Ok(symbol)
    }

    pub fn symbol_name(&self, symbol: Value) -> Option<String> {
        if self.memory.class_index_of(symbol).ok()? != class_index::SYMBOL {
            return None;
        }
        let bytes = self.memory.bytes(symbol).ok()?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn new_string(&mut self, s: &str) -> Result<Value, VmError> {
        Ok(self
            .memory
            .allocate_bytes(s.as_bytes(), ObjectFormat::Indexable8, class_index::STRING)?)
    }

    pub fn new_array(&mut self, elements: &[Value]) -> Result<Value, VmError> {
        let array = self.memory.allocate(
            0,
            elements.len(),
            ObjectFormat::VariableSize,
            class_index::ARRAY,
            None,
        )?;
        for (i, &element) in elements.iter().enumerate() {
            self.memory.store_pointer(array, i, element)?;
        }
        Ok(array)
    }

    /// A global binding for literal-variable bytecodes.
    pub fn new_association(&mut self, key: &str, value: Value) -> Result<Value, VmError> {
        let key = self.intern(key)?;
        let association = self.memory.allocate(
            2,
            0,
            ObjectFormat::FixedSize,
            class_index::ASSOCIATION,
            None,
        )?;
        self.memory.store_pointer(association, 0, key)?;
        self.memory.store_pointer(association, 1, value)?;
        Ok(association)
    }

    // ── field access ───────────────────────────────────────────────

    /// Pointer field `index` (0-based) of `object`.
    pub fn instance_variable(&self, object: Value, index: usize) -> Result<Value, VmError> {
        Ok(self.memory.fetch_pointer(object, index)?)
    }

    pub fn set_instance_variable(
        &mut self,
        object: Value,
        index: usize,
        value: Value,
    ) -> Result<(), VmError> {
        Ok(self.memory.store_pointer(object, index, value)?)
    }

    /// Literal `index` (0-based) of a compiled method.
    pub fn literal_of(&self, method: Value, index: usize) -> Result<Value, VmError> {
        let method =
            CompiledMethod::from_value(&self.memory, method).ok_or(VmError::NotAMethod(method))?;
        Ok(method.literal(&self.memory, index)?)
    }

    /// Short human-readable description of any value.
    pub fn print_string(&self, value: Value) -> String {
        if value == self.nil() {
            return "nil".into();
        }
        if value == self.special.true_obj {
            return "true".into();
        }
        if value == self.special.false_obj {
            return "false".into();
        }
        if let Some(n) = value.as_small_integer() {
            return n.to_string();
        }
        if let Some(c) = value.as_char() {
            return format!("${c}");
        }
        if let Some(f) = value.as_small_float() {
            return format!("{f:?}");
        }
        if let Some(name) = self.symbol_name(value) {
            return format!("#{name}");
        }
        if let Some(name) = self.class_name(value) {
            return name;
        }
        match self.memory.class_index_of(value) {
            Ok(class_index::STRING) => match self.memory.bytes(value) {
                Ok(bytes) => format!("'{}'", String::from_utf8_lossy(bytes)),
                Err(_) => format!("{value:?}"),
            },
            _ => match self.class_of(value).ok().and_then(|c| self.class_name(c)) {
                Some(name) if name.starts_with(['A', 'E', 'I', 'O', 'U']) => format!("an {name}"),
                Some(name) => format!("a {name}"),
                None => format!("{value:?}"),
            },
        }
    }
}

impl std::fmt::Debug for VM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VM")
            .field("objects", &self.memory.object_count())
            .field("used_bytes", &self.memory.used_bytes())
            .field("classes", &self.class_table.len())
            .field("symbols", &self.intern_table.len())
            .field("natives", &self.natives.len())
            .finish_non_exhaustive()
    }
}
