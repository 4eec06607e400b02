use object::{ObjectFormat, Value};

use crate::VM;
use crate::error::VmError;
use crate::primitives::{
    FromValue, IntoValue, NativeMethodDescriptor, argument, checked_index, expect_format,
};
use crate::special::class_index;
use crate::stack::ExecutionContext;

pub const OBJECT_METHODS: &[NativeMethodDescriptor] = &[
    NativeMethodDescriptor::new("==", 1, object_identical),
    NativeMethodDescriptor::new("~~", 1, object_not_identical),
    NativeMethodDescriptor::new("=", 1, object_identical),
    NativeMethodDescriptor::new("~=", 1, object_not_identical),
    NativeMethodDescriptor::new("class", 0, object_class),
    NativeMethodDescriptor::new("identityHash", 0, object_identity_hash),
    NativeMethodDescriptor::new("yourself", 0, object_yourself),
    NativeMethodDescriptor::new("isNil", 0, object_is_nil),
    NativeMethodDescriptor::new("notNil", 0, object_not_nil),
    NativeMethodDescriptor::new("printString", 0, object_print_string),
    NativeMethodDescriptor::new("instVarAt:", 1, object_inst_var_at),
    NativeMethodDescriptor::new("instVarAt:put:", 2, object_inst_var_at_put),
];

pub const BEHAVIOR_METHODS: &[NativeMethodDescriptor] = &[
    NativeMethodDescriptor::new("basicNew", 0, behavior_new),
    NativeMethodDescriptor::new("new", 0, behavior_new),
    NativeMethodDescriptor::new("basicNew:", 1, behavior_new_sized),
    NativeMethodDescriptor::new("new:", 1, behavior_new_sized),
    NativeMethodDescriptor::new("name", 0, behavior_name),
    NativeMethodDescriptor::new("superclass", 0, behavior_superclass),
];

pub const STRING_METHODS: &[NativeMethodDescriptor] = &[
    NativeMethodDescriptor::new("size", 0, bytes_size),
    NativeMethodDescriptor::new("at:", 1, string_at),
    NativeMethodDescriptor::new("at:put:", 2, string_at_put),
];

pub const ARRAY_METHODS: &[NativeMethodDescriptor] = &[
    NativeMethodDescriptor::new("size", 0, array_size),
    NativeMethodDescriptor::new("at:", 1, array_at),
    NativeMethodDescriptor::new("at:put:", 2, array_at_put),
];

pub const CHARACTER_METHODS: &[NativeMethodDescriptor] = &[
    NativeMethodDescriptor::new("value", 0, character_value),
    NativeMethodDescriptor::new("asInteger", 0, character_value),
];

pub const BOOLEAN_METHODS: &[NativeMethodDescriptor] = &[
    NativeMethodDescriptor::new("not", 0, boolean_not),
    NativeMethodDescriptor::new("&", 1, boolean_and),
    NativeMethodDescriptor::new("|", 1, boolean_or),
];

// ── Object ─────────────────────────────────────────────────────────

pub fn object_identical(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let other = argument::<Value>(vm, args, 0)?;
    Ok(vm.boolean(receiver == other))
}

pub fn object_not_identical(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let other = argument::<Value>(vm, args, 0)?;
    Ok(vm.boolean(receiver != other))
}

pub fn object_class(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    vm.class_of(receiver)
}

pub fn object_identity_hash(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    Ok(Value::from_i64(vm.memory.identity_hash_of(receiver)? as i64))
}

pub fn object_yourself(
    _vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    Ok(receiver)
}

pub fn object_is_nil(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    Ok(vm.boolean(receiver == vm.nil()))
}

pub fn object_not_nil(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    Ok(vm.boolean(receiver != vm.nil()))
}

pub fn object_print_string(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    let printed = vm.print_string(receiver);
    printed.into_value(vm)
}

/// 1-based access to named and indexable pointer fields.
pub fn object_inst_var_at(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let index = argument::<i64>(vm, args, 0)?;
    expect_format(vm, receiver, ObjectFormat::is_pointers, "pointer object")?;
    let size = vm.memory.slot_count(receiver)?;
    let index = checked_index(receiver, index, size)?;
    vm.instance_variable(receiver, index)
}

pub fn object_inst_var_at_put(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let index = argument::<i64>(vm, args, 0)?;
    let value = argument::<Value>(vm, args, 1)?;
    expect_format(vm, receiver, ObjectFormat::is_pointers, "pointer object")?;
    let size = vm.memory.slot_count(receiver)?;
    let index = checked_index(receiver, index, size)?;
    vm.set_instance_variable(receiver, index, value)?;
    Ok(value)
}

// ── Behavior ───────────────────────────────────────────────────────

pub fn behavior_new(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    vm.instantiate(receiver, 0)
}

pub fn behavior_new_sized(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let size = argument::<usize>(vm, args, 0)?;
    vm.instantiate(receiver, size)
}

pub fn behavior_name(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    let name = vm.class_name(receiver).ok_or(VmError::InvalidClass(receiver))?;
    name.into_value(vm)
}

pub fn behavior_superclass(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    vm.superclass(receiver)
}

// ── String / Symbol ────────────────────────────────────────────────

pub fn bytes_size(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    expect_format(vm, receiver, ObjectFormat::is_bytes, "byte object")?;
    vm.memory.byte_size(receiver)?.into_value(vm)
}

pub fn string_at(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let index = argument::<i64>(vm, args, 0)?;
    expect_format(vm, receiver, ObjectFormat::is_bytes, "byte object")?;
    let index = checked_index(receiver, index, vm.memory.byte_size(receiver)?)?;
    let byte = vm.memory.fetch_byte(receiver, index)?;
    Ok(Value::from_code_point(byte as u32))
}

pub fn string_at_put(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let index = argument::<i64>(vm, args, 0)?;
    let value = argument::<Value>(vm, args, 1)?;
    let c = char::from_value(vm, value)?;
    let byte = u8::try_from(c as u32).map_err(|_| VmError::PrimitiveFailed {
        selector: "at:put:",
        receiver,
    })?;
    expect_format(vm, receiver, ObjectFormat::is_bytes, "byte object")?;
    let index = checked_index(receiver, index, vm.memory.byte_size(receiver)?)?;
    vm.memory.store_byte(receiver, index, byte)?;
    Ok(value)
}

// ── Array ──────────────────────────────────────────────────────────

fn expect_array(vm: &VM, receiver: Value) -> Result<usize, VmError> {
    if vm.memory.class_index_of(receiver)? != class_index::ARRAY {
        return Err(VmError::TypeError {
            expected: "Array",
            got: receiver,
        });
    }
    Ok(vm.memory.element_count(receiver)?)
}

pub fn array_size(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    expect_array(vm, receiver)?.into_value(vm)
}

pub fn array_at(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let index = argument::<i64>(vm, args, 0)?;
    let size = expect_array(vm, receiver)?;
    let index = checked_index(receiver, index, size)?;
    Ok(vm.memory.fetch_pointer(receiver, index)?)
}

pub fn array_at_put(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let index = argument::<i64>(vm, args, 0)?;
    let value = argument::<Value>(vm, args, 1)?;
    let size = expect_array(vm, receiver)?;
    let index = checked_index(receiver, index, size)?;
    vm.memory.store_pointer(receiver, index, value)?;
    Ok(value)
}

// ── Character / Boolean ────────────────────────────────────────────

pub fn character_value(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    let c = char::from_value(vm, receiver)?;
    Ok(Value::from_i64(c as i64))
}

pub fn boolean_not(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    let b = bool::from_value(vm, receiver)?;
    Ok(vm.boolean(!b))
}

pub fn boolean_and(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let a = bool::from_value(vm, receiver)?;
    let b = argument::<bool>(vm, args, 0)?;
    Ok(vm.boolean(a && b))
}

pub fn boolean_or(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let a = bool::from_value(vm, receiver)?;
    let b = argument::<bool>(vm, args, 0)?;
    Ok(vm.boolean(a || b))
}
