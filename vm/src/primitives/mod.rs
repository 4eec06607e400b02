use object::{MemoryError, ObjectFormat, Value};

use crate::VM;
use crate::error::VmError;
use crate::special::class_index;
use crate::stack::ExecutionContext;

pub mod float;
pub mod integer;
pub mod kernel;

/// A native method body. Receives the receiver and its arguments in call
/// order.
pub type NativeFn = fn(
    &mut VM,
    &mut ExecutionContext,
    Value,
    &[Value],
) -> Result<Value, VmError>;

/// One entry of a native method table.
#[derive(Clone, Copy)]
pub struct NativeMethodDescriptor {
    pub selector: &'static str,
    pub arity: u8,
    pub function: NativeFn,
}

impl NativeMethodDescriptor {
    pub const fn new(selector: &'static str, arity: u8, function: NativeFn) -> Self {
        Self {
            selector,
            arity,
            function,
        }
    }
}

impl std::fmt::Debug for NativeMethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeMethodDescriptor")
            .field("selector", &self.selector)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Field indices of NativeMethod objects.
pub struct NativeSlot;

impl NativeSlot {
    pub const SELECTOR: usize = 0;
    pub const ARGUMENT_COUNT: usize = 1;
    pub const INDEX: usize = 2;
    pub const SIZE: usize = 3;
}

/// Install the kernel native methods on their classes.
pub fn install_kernel_natives(vm: &mut VM) -> Result<(), VmError> {
    let tables: [(u32, &[NativeMethodDescriptor]); 8] = [
        (class_index::OBJECT, kernel::OBJECT_METHODS),
        (class_index::BEHAVIOR, kernel::BEHAVIOR_METHODS),
        (class_index::STRING, kernel::STRING_METHODS),
        (class_index::ARRAY, kernel::ARRAY_METHODS),
        (class_index::CHARACTER, kernel::CHARACTER_METHODS),
        (class_index::SMALL_INTEGER, integer::SMALL_INTEGER_METHODS),
        (class_index::SMALL_FLOAT, float::SMALL_FLOAT_METHODS),
        (class_index::BOOLEAN, kernel::BOOLEAN_METHODS),
    ];
    for (index, methods) in tables {
        let class = vm.class_at(index).ok_or(VmError::InvalidClass(vm.nil()))?;
        vm.install_native_methods(class, methods)?;
    }
    Ok(())
}

// ── marshalling ────────────────────────────────────────────────────

/// Conversion from a tagged value into a Rust value.
pub trait FromValue: Sized {
    fn from_value(vm: &VM, value: Value) -> Result<Self, VmError>;
}

/// Conversion from a Rust value into a tagged value, allocating if needed.
pub trait IntoValue {
    fn into_value(self, vm: &mut VM) -> Result<Value, VmError>;
}

impl FromValue for Value {
    fn from_value(_vm: &VM, value: Value) -> Result<Self, VmError> {
        Ok(value)
    }
}

impl IntoValue for Value {
    fn into_value(self, _vm: &mut VM) -> Result<Value, VmError> {
        Ok(self)
    }
}

impl FromValue for i64 {
    fn from_value(_vm: &VM, value: Value) -> Result<Self, VmError> {
        value.as_small_integer().ok_or(VmError::TypeError {
            expected: "SmallInteger",
            got: value,
        })
    }
}

impl IntoValue for i64 {
    fn into_value(self, _vm: &mut VM) -> Result<Value, VmError> {
        Value::try_from_i64(self).ok_or(VmError::Unrepresentable {
            kind: "SmallInteger",
        })
    }
}

impl FromValue for usize {
    fn from_value(vm: &VM, value: Value) -> Result<Self, VmError> {
        let n = i64::from_value(vm, value)?;
        usize::try_from(n).map_err(|_| VmError::TypeError {
            expected: "non-negative SmallInteger",
            got: value,
        })
    }
}

impl IntoValue for usize {
    fn into_value(self, vm: &mut VM) -> Result<Value, VmError> {
        i64::try_from(self)
            .map_err(|_| VmError::Unrepresentable {
                kind: "SmallInteger",
            })?
            .into_value(vm)
    }
}

impl FromValue for bool {
    fn from_value(vm: &VM, value: Value) -> Result<Self, VmError> {
        if value == vm.special.true_obj {
            Ok(true)
        } else if value == vm.special.false_obj {
            Ok(false)
        } else {
            Err(VmError::TypeError {
                expected: "Boolean",
                got: value,
            })
        }
    }
}

impl IntoValue for bool {
    fn into_value(self, vm: &mut VM) -> Result<Value, VmError> {
        Ok(vm.boolean(self))
    }
}

impl FromValue for char {
    fn from_value(_vm: &VM, value: Value) -> Result<Self, VmError> {
        value.as_char().ok_or(VmError::TypeError {
            expected: "Character",
            got: value,
        })
    }
}

impl IntoValue for char {
    fn into_value(self, _vm: &mut VM) -> Result<Value, VmError> {
        Ok(Value::from_char(self))
    }
}

impl FromValue for f64 {
    fn from_value(_vm: &VM, value: Value) -> Result<Self, VmError> {
        value.as_small_float().ok_or(VmError::TypeError {
            expected: "SmallFloat",
            got: value,
        })
    }
}

impl IntoValue for f64 {
    fn into_value(self, _vm: &mut VM) -> Result<Value, VmError> {
        Value::try_from_f64(self).ok_or(VmError::Unrepresentable { kind: "SmallFloat" })
    }
}

/// Strings and Symbols read back as UTF-8.
impl FromValue for String {
    fn from_value(vm: &VM, value: Value) -> Result<Self, VmError> {
        let index = vm.memory.class_index_of(value)?;
        if index != class_index::STRING && index != class_index::SYMBOL {
            return Err(VmError::TypeError {
                expected: "String",
                got: value,
            });
        }
        Ok(String::from_utf8_lossy(vm.memory.bytes(value)?).into_owned())
    }
}

impl IntoValue for &str {
    fn into_value(self, vm: &mut VM) -> Result<Value, VmError> {
        vm.new_string(self)
    }
}

impl IntoValue for String {
    fn into_value(self, vm: &mut VM) -> Result<Value, VmError> {
        vm.new_string(&self)
    }
}

/// Argument `index` converted to `T`.
pub fn argument<T: FromValue>(vm: &VM, args: &[Value], index: usize) -> Result<T, VmError> {
    let value = args
        .get(index)
        .copied()
        .ok_or(VmError::ArgumentCountMismatch {
            expected: index + 1,
            got: args.len(),
        })?;
    T::from_value(vm, value)
}

/// Index of a 1-based Smalltalk index into a collection of `size`.
pub(crate) fn checked_index(receiver: Value, index: i64, size: usize) -> Result<usize, VmError> {
    match usize::try_from(index) {
        Ok(i) if i >= 1 && i <= size => Ok(i - 1),
        _ => Err(VmError::Memory(MemoryError::IndexOutOfBounds {
            object: receiver,
            index: index.max(0) as usize,
            size,
        })),
    }
}

pub(crate) fn expect_format(
    vm: &VM,
    receiver: Value,
    accept: fn(ObjectFormat) -> bool,
    expected: &'static str,
) -> Result<ObjectFormat, VmError> {
    match vm.memory.format(receiver) {
        Ok((format, _)) if accept(format) => Ok(format),
        _ => Err(VmError::TypeError {
            expected,
            got: receiver,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmSettings;

    #[test]
    fn marshalling_round_trips() {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let v = 42i64.into_value(&mut vm).unwrap();
        assert_eq!(i64::from_value(&vm, v).unwrap(), 42);
        let v = true.into_value(&mut vm).unwrap();
        assert!(bool::from_value(&vm, v).unwrap());
        let v = 'λ'.into_value(&mut vm).unwrap();
        assert_eq!(char::from_value(&vm, v).unwrap(), 'λ');
        let v = 1.5f64.into_value(&mut vm).unwrap();
        assert_eq!(f64::from_value(&vm, v).unwrap(), 1.5);
        let v = "hello".into_value(&mut vm).unwrap();
        assert_eq!(String::from_value(&vm, v).unwrap(), "hello");
    }

    #[test]
    fn marshalling_rejects_wrong_kinds() {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let c = Value::from_char('a');
        assert_eq!(
            i64::from_value(&vm, c),
            Err(VmError::TypeError { expected: "SmallInteger", got: c })
        );
        assert_eq!(
            bool::from_value(&vm, vm.nil()),
            Err(VmError::TypeError { expected: "Boolean", got: vm.nil() })
        );
        assert_eq!(
            i64::MAX.into_value(&mut vm),
            Err(VmError::Unrepresentable { kind: "SmallInteger" })
        );
        assert!(usize::from_value(&vm, Value::from_i64(-1)).is_err());
    }

    #[test]
    fn missing_arguments_report_the_count() {
        let vm = VM::new(VmSettings::default()).unwrap();
        let args = [Value::from_i64(1)];
        assert_eq!(argument::<i64>(&vm, &args, 0), Ok(1));
        assert_eq!(
            argument::<i64>(&vm, &args, 1),
            Err(VmError::ArgumentCountMismatch { expected: 2, got: 1 })
        );
    }

    #[test]
    fn smalltalk_indices_are_one_based() {
        let r = Value::from_i64(0);
        assert_eq!(checked_index(r, 1, 3), Ok(0));
        assert_eq!(checked_index(r, 3, 3), Ok(2));
        assert!(checked_index(r, 0, 3).is_err());
        assert!(checked_index(r, 4, 3).is_err());
        assert!(checked_index(r, -1, 3).is_err());
    }
}
