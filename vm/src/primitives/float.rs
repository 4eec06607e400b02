use object::Value;

use crate::VM;
use crate::error::VmError;
use crate::primitives::{FromValue, IntoValue, NativeMethodDescriptor, argument};
use crate::stack::ExecutionContext;

pub const SMALL_FLOAT_METHODS: &[NativeMethodDescriptor] = &[
    NativeMethodDescriptor::new("+", 1, float_add),
    NativeMethodDescriptor::new("-", 1, float_sub),
    NativeMethodDescriptor::new("*", 1, float_mul),
    NativeMethodDescriptor::new("/", 1, float_div),
    NativeMethodDescriptor::new("<", 1, float_lt),
    NativeMethodDescriptor::new(">", 1, float_gt),
    NativeMethodDescriptor::new("<=", 1, float_le),
    NativeMethodDescriptor::new(">=", 1, float_ge),
    NativeMethodDescriptor::new("=", 1, float_eq),
    NativeMethodDescriptor::new("~=", 1, float_ne),
    NativeMethodDescriptor::new("truncated", 0, float_truncated),
    NativeMethodDescriptor::new("printString", 0, float_print_string),
];

/// The receiver and argument as doubles. SmallInteger arguments are
/// converted.
fn operands(vm: &VM, receiver: Value, args: &[Value]) -> Result<(f64, f64), VmError> {
    let a = f64::from_value(vm, receiver)?;
    let arg = argument::<Value>(vm, args, 0)?;
    let b = match arg.as_small_integer() {
        Some(n) => n as f64,
        None => f64::from_value(vm, arg)?,
    };
    Ok((a, b))
}

fn float_result(
    vm: &mut VM,
    selector: &'static str,
    receiver: Value,
    result: f64,
) -> Result<Value, VmError> {
    result
        .into_value(vm)
        .map_err(|_| VmError::PrimitiveFailed { selector, receiver })
}

pub fn float_add(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    float_result(vm, "+", receiver, a + b)
}

pub fn float_sub(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    float_result(vm, "-", receiver, a - b)
}

pub fn float_mul(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    float_result(vm, "*", receiver, a * b)
}

pub fn float_div(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    if b == 0.0 {
        return Err(VmError::PrimitiveFailed { selector: "/", receiver });
    }
    float_result(vm, "/", receiver, a / b)
}

pub fn float_lt(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    Ok(vm.boolean(a < b))
}

pub fn float_gt(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    Ok(vm.boolean(a > b))
}

pub fn float_le(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    Ok(vm.boolean(a <= b))
}

pub fn float_ge(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    Ok(vm.boolean(a >= b))
}

pub fn float_eq(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    Ok(vm.boolean(a == b))
}

pub fn float_ne(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let (a, b) = operands(vm, receiver, args)?;
    Ok(vm.boolean(a != b))
}

pub fn float_truncated(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    let a = f64::from_value(vm, receiver)?;
    let t = a.trunc();
    if !t.is_finite() || t < i64::MIN as f64 || t >= i64::MAX as f64 {
        return Err(VmError::PrimitiveFailed {
            selector: "truncated",
            receiver,
        });
    }
    Value::try_from_i64(t as i64).ok_or(VmError::PrimitiveFailed {
        selector: "truncated",
        receiver,
    })
}

pub fn float_print_string(
    vm: &mut VM,
    _ctx: &mut ExecutionContext,
    receiver: Value,
    _args: &[Value],
) -> Result<Value, VmError> {
    let a = f64::from_value(vm, receiver)?;
    format!("{a:?}").into_value(vm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmSettings;

    fn float(x: f64) -> Value {
        Value::try_from_f64(x).unwrap()
    }

    fn call(f: crate::primitives::NativeFn, a: Value, b: Value) -> Result<Value, VmError> {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let mut ctx = ExecutionContext::new(&vm);
        f(&mut vm, &mut ctx, a, &[b])
    }

    #[test]
    fn arithmetic_mixes_with_integers() {
        assert_eq!(call(float_add, float(1.5), float(2.25)), Ok(float(3.75)));
        assert_eq!(call(float_mul, float(1.5), Value::from_i64(4)), Ok(float(6.0)));
        assert_eq!(call(float_div, float(1.0), float(4.0)), Ok(float(0.25)));
        assert!(call(float_div, float(1.0), float(0.0)).is_err());
    }

    #[test]
    fn non_numbers_are_type_errors() {
        let c = Value::from_char('a');
        assert_eq!(
            call(float_add, float(1.0), c),
            Err(VmError::TypeError { expected: "SmallFloat", got: c })
        );
    }

    #[test]
    fn truncation() {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let mut ctx = ExecutionContext::new(&vm);
        assert_eq!(
            float_truncated(&mut vm, &mut ctx, float(-2.75), &[]),
            Ok(Value::from_i64(-2))
        );
    }
}
