use object::Value;

use crate::VM;
use crate::error::VmError;
use crate::primitives::{FromValue, IntoValue, NativeMethodDescriptor, argument};
use crate::stack::ExecutionContext;

pub const SMALL_INTEGER_METHODS: &[NativeMethodDescriptor] = &[
    NativeMethodDescriptor::new("+", 1, integer_add),
    NativeMethodDescriptor::new("-", 1, integer_sub),
    NativeMethodDescriptor::new("*", 1, integer_mul),
    NativeMethodDescriptor::new("//", 1, integer_div),
    NativeMethodDescriptor::new("\\\\", 1, integer_mod),
    NativeMethodDescriptor::new("<", 1, integer_lt),
    NativeMethodDescriptor::new(">", 1, integer_gt),
    NativeMethodDescriptor::new("<=", 1, integer_le),
    NativeMethodDescriptor::new(">=", 1, integer_ge),
    NativeMethodDescriptor::new("=", 1, integer_eq),
    NativeMethodDescriptor::new("~=", 1, integer_ne),
    NativeMethodDescriptor::new("bitAnd:", 1, integer_bit_and),
    NativeMethodDescriptor::new("bitOr:", 1, integer_bit_or),
    NativeMethodDescriptor::new("bitXor:", 1, integer_bit_xor),
    NativeMethodDescriptor::new("bitShift:", 1, integer_bit_shift),
    NativeMethodDescriptor::new("negated", 0, integer_negated),
    NativeMethodDescriptor::new("asFloat", 0, integer_as_float),
    NativeMethodDescriptor::new("asCharacter", 0, integer_as_character),
    NativeMethodDescriptor::new("printString", 0, integer_print_string),
];

fn operands(vm: &VM, receiver: Value, args: &[Value]) -> Result<(i64, i64), VmError> {
    Ok((i64::from_value(vm, receiver)?, argument(vm, args, 0)?))
}

/// A checked result, or `PrimitiveFailed` when it leaves the SmallInteger
/// range.
fn checked(
    selector: &'static str,
    receiver: Value,
    result: Option<i64>,
) -> Result<Value, VmError> {
    result
        .and_then(Value::try_from_i64)
        .ok_or(VmError::PrimitiveFailed { selector, receiver })
}

pub fn integer_add(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    checked("+", receiver, a.checked_add(b))
}

pub fn integer_sub(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    checked("-", receiver, a.checked_sub(b))
}

pub fn integer_mul(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    checked("*", receiver, a.checked_mul(b))
}

/// Floored division.
pub fn integer_div(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    if b == 0 {
        return Err(VmError::PrimitiveFailed { selector: "//", receiver });
    }
    checked("//", receiver, Some(a.div_euclid(b) - ((a.rem_euclid(b) != 0 && b < 0) as i64)))
}

/// Modulo with the sign of the divisor.
pub fn integer_mod(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    if b == 0 {
        return Err(VmError::PrimitiveFailed { selector: "\\\\", receiver });
    }
    let r = a % b;
    let r = if r != 0 && (r < 0) != (b < 0) { r + b } else { r };
    checked("\\\\", receiver, Some(r))
}

pub fn integer_lt(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    (a < b).into_value(vm)
}

pub fn integer_gt(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    (a > b).into_value(vm)
}

pub fn integer_le(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    (a <= b).into_value(vm)
}

pub fn integer_ge(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    (a >= b).into_value(vm)
}

/// Non-integer arguments compare unequal.
pub fn integer_eq(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let other = argument::<Value>(vm, args, 0)?;
    Ok(vm.boolean(other == receiver))
}

pub fn integer_ne(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let other = argument::<Value>(vm, args, 0)?;
    Ok(vm.boolean(other != receiver))
}

pub fn integer_bit_and(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    Ok(Value::from_i64(a & b))
}

pub fn integer_bit_or(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    Ok(Value::from_i64(a | b))
}

pub fn integer_bit_xor(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    Ok(Value::from_i64(a ^ b))
}

/// Positive shifts go left, negative shifts go right.
pub fn integer_bit_shift(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, shift) = operands(vm, receiver, args)?;
    let result = if shift >= 0 {
        u32::try_from(shift)
            .ok()
            .and_then(|s| a.checked_shl(s))
            .filter(|r| r.checked_shr(shift as u32) == Some(a))
    } else {
        Some(a >> shift.unsigned_abs().min(63))
    };
    checked("bitShift:", receiver, result)
}

pub fn integer_negated(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    let a = i64::from_value(vm, receiver)?;
    checked("negated", receiver, a.checked_neg())
}

pub fn integer_as_float(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    let a = i64::from_value(vm, receiver)?;
    (a as f64).into_value(vm)
}

pub fn integer_as_character(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    let a = i64::from_value(vm, receiver)?;
    u32::try_from(a)
        .ok()
        .and_then(char::from_u32)
        .map(Value::from_char)
        .ok_or(VmError::PrimitiveFailed {
            selector: "asCharacter",
            receiver,
        })
}

pub fn integer_print_string(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    let a = i64::from_value(vm, receiver)?;
    a.to_string().into_value(vm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmSettings;
    use object::SMALL_INTEGER_MAX;

    fn call(f: crate::primitives::NativeFn, a: i64, b: i64) -> Result<Value, VmError> {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let mut ctx = ExecutionContext::new(&vm);
        f(&mut vm, &mut ctx, Value::from_i64(a), &[Value::from_i64(b)])
    }

    #[test]
    fn arithmetic() {
        assert_eq!(call(integer_add, 3, 4), Ok(Value::from_i64(7)));
        assert_eq!(call(integer_sub, 3, 4), Ok(Value::from_i64(-1)));
        assert_eq!(call(integer_mul, -6, 7), Ok(Value::from_i64(-42)));
    }

    #[test]
    fn overflow_fails_the_primitive() {
        assert_eq!(
            call(integer_add, SMALL_INTEGER_MAX, 1),
            Err(VmError::PrimitiveFailed {
                selector: "+",
                receiver: Value::from_i64(SMALL_INTEGER_MAX)
            })
        );
        assert!(call(integer_mul, SMALL_INTEGER_MAX, 2).is_err());
        assert!(call(integer_bit_shift, 1, 62).is_err());
        assert_eq!(call(integer_bit_shift, 1, 61), Ok(Value::from_i64(1 << 61)));
    }

    #[test]
    fn division_floors_toward_negative_infinity() {
        assert_eq!(call(integer_div, 7, 2), Ok(Value::from_i64(3)));
        assert_eq!(call(integer_div, -7, 2), Ok(Value::from_i64(-4)));
        assert_eq!(call(integer_div, 7, -2), Ok(Value::from_i64(-4)));
        assert_eq!(call(integer_div, -7, -2), Ok(Value::from_i64(3)));
        assert_eq!(call(integer_mod, -7, 2), Ok(Value::from_i64(1)));
        assert_eq!(call(integer_mod, 7, -2), Ok(Value::from_i64(-1)));
        assert!(call(integer_div, 1, 0).is_err());
    }

    #[test]
    fn shifts_and_bits() {
        assert_eq!(call(integer_bit_shift, 5, 2), Ok(Value::from_i64(20)));
        assert_eq!(call(integer_bit_shift, -20, -2), Ok(Value::from_i64(-5)));
        assert_eq!(call(integer_bit_and, 12, 10), Ok(Value::from_i64(8)));
        assert_eq!(call(integer_bit_or, 12, 10), Ok(Value::from_i64(14)));
    }
}
