use bytecode::{
    BytecodeDecoder, CompiledMethod, DecodeError, Instruction, MethodHeader, SPECIAL_SELECTORS,
    special,
};
use log::{debug, trace};
use object::Value;

use crate::VM;
use crate::dispatch::MethodKind;
use crate::error::VmError;
use crate::stack::{ExecutionContext, FrameMetadata, StackMemory, frame};

/// Interpreter registers for the active frame. Re-derived from the stack
/// after every return.
#[derive(Debug, Clone, Copy)]
struct Registers {
    method: CompiledMethod,
    header: MethodHeader,
    pc: usize,
}

impl Registers {
    fn arg_count(&self) -> usize {
        self.header.arg_count as usize
    }

    fn temp_count(&self) -> usize {
        self.header.temp_count as usize
    }
}

/// Run `method` with `receiver` and `args` on `ctx`'s stack and answer its
/// result.
///
/// The entry frame returns to pc 0, which ends the loop. On error the
/// stack is reset to where it was on entry.
pub fn execute_method(
    vm: &mut VM,
    ctx: &mut ExecutionContext,
    method: CompiledMethod,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let saved = ctx.stack.save();
    match enter(vm, ctx, method, receiver, args) {
        Ok(value) => Ok(value),
        Err(e) => {
            ctx.stack.restore(saved);
            Err(e)
        }
    }
}

/// [`execute_method`] for an untyped method value.
pub fn execute(
    vm: &mut VM,
    ctx: &mut ExecutionContext,
    method: Value,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    let method = CompiledMethod::from_value(&vm.memory, method).ok_or(VmError::NotAMethod(method))?;
    execute_method(vm, ctx, method, receiver, args)
}

fn enter(
    vm: &mut VM,
    ctx: &mut ExecutionContext,
    method: CompiledMethod,
    receiver: Value,
    args: &[Value],
) -> Result<Value, VmError> {
    ctx.stack.push_value(receiver)?;
    for &arg in args {
        ctx.stack.push_value(arg)?;
    }
    let registers = activate_method_frame(vm, &mut ctx.stack, method, 0, args.len())?;
    run(vm, ctx, registers)?;
    ctx.stack.pop_value()
}

/// Build a frame for `method` over the receiver and `arg_count` arguments
/// already on the stack.
fn activate_method_frame(
    vm: &VM,
    stack: &mut StackMemory,
    method: CompiledMethod,
    return_pc: usize,
    arg_count: usize,
) -> Result<Registers, VmError> {
    let header = method.header(&vm.memory)?;
    if header.arg_count as usize != arg_count {
        return Err(VmError::ArgumentCountMismatch {
            expected: header.arg_count as usize,
            got: arg_count,
        });
    }
    let receiver = stack.peek(arg_count)?;
    let nil = vm.nil();

    stack.push_uword(return_pc as u64)?;
    stack.push_pointer(stack.fp())?;
    stack.set_fp(stack.sp());
    stack.push_value(method.0)?;
    stack.push_uword(FrameMetadata::new(header.arg_count).pack())?;
    stack.push_value(nil)?;
    stack.push_value(receiver)?;
    for _ in 0..header.temp_count {
        stack.push_value(nil)?;
    }

    debug!(
        "activate {:?} fp={} args={} temps={}",
        method.0,
        stack.fp(),
        header.arg_count,
        header.temp_count
    );
    Ok(Registers {
        method,
        header,
        pc: header.initial_pc(),
    })
}

/// Pop the active frame and push `value` for the caller.
///
/// Answers the caller's registers, or `None` when the frame was an entry
/// frame.
fn return_value(vm: &VM, stack: &mut StackMemory, value: Value) -> Result<Option<Registers>, VmError> {
    let arg_count = stack.frame_metadata()?.arg_count as usize;
    stack.set_sp(stack.fp())?;
    let previous_fp = stack.pop_pointer()?;
    let return_pc = stack.pop_uword()? as usize;
    stack.drop_words(arg_count + 1)?;
    stack.set_fp(previous_fp);
    stack.push_value(value)?;
    debug!("return {value:?} to pc {return_pc}");

    if return_pc == 0 {
        return Ok(None);
    }
    let method = stack.frame_method()?;
    let method = CompiledMethod::from_value(&vm.memory, method).ok_or(VmError::NotAMethod(method))?;
    Ok(Some(Registers {
        method,
        header: method.header(&vm.memory)?,
        pc: return_pc,
    }))
}

fn fetch(vm: &VM, registers: &Registers) -> Result<(Instruction, usize), VmError> {
    let body = registers.method.body(&vm.memory)?;
    let mut decoder = BytecodeDecoder::at(body, registers.pc);
    match decoder.decode_next() {
        Some(Ok((offset, instruction))) => {
            trace!("{offset:>5}  {instruction}");
            Ok((instruction, decoder.offset()))
        }
        Some(Err(e)) => Err(e.into()),
        None => Err(DecodeError::Truncated {
            offset: registers.pc,
        }
        .into()),
    }
}

fn jump_target(pc: usize, offset: i64) -> Result<usize, VmError> {
    isize::try_from(offset)
        .ok()
        .and_then(|offset| pc.checked_add_signed(offset))
        .ok_or(VmError::MalformedBytecode(DecodeError::InvalidOperand { offset: pc }))
}

fn literal(vm: &VM, registers: &Registers, index: u32) -> Result<Value, VmError> {
    Ok(registers.method.literal(&vm.memory, index as usize)?)
}

fn temp_address(stack: &StackMemory, registers: &Registers, index: u32) -> Result<usize, VmError> {
    stack.temp_address(registers.arg_count(), registers.temp_count(), index as usize)
}

const ASSOCIATION_VALUE: usize = 1;

fn run(vm: &mut VM, ctx: &mut ExecutionContext, mut registers: Registers) -> Result<(), VmError> {
    loop {
        let (instruction, next_pc) = fetch(vm, &registers)?;
        registers.pc = next_pc;

        let returned = match instruction {
            Instruction::PushReceiverVariable(i) => {
                let receiver = ctx.stack.frame_receiver()?;
                let value = vm.memory.fetch_pointer(receiver, i as usize)?;
                ctx.stack.push_value(value)?;
                None
            }
            Instruction::PushLiteralVariable(i) => {
                let association = literal(vm, &registers, i)?;
                let value = vm.memory.fetch_pointer(association, ASSOCIATION_VALUE)?;
                ctx.stack.push_value(value)?;
                None
            }
            Instruction::PushLiteralConstant(i) => {
                let value = literal(vm, &registers, i)?;
                ctx.stack.push_value(value)?;
                None
            }
            Instruction::PushTemp(i) => {
                let address = temp_address(&ctx.stack, &registers, i)?;
                let value = ctx.stack.read_value(address)?;
                ctx.stack.push_value(value)?;
                None
            }
            Instruction::PushReceiver => {
                let receiver = ctx.stack.frame_receiver()?;
                ctx.stack.push_value(receiver)?;
                None
            }
            Instruction::PushTrue => {
                ctx.stack.push_value(vm.boolean(true))?;
                None
            }
            Instruction::PushFalse => {
                ctx.stack.push_value(vm.boolean(false))?;
                None
            }
            Instruction::PushNil => {
                ctx.stack.push_value(vm.nil())?;
                None
            }
            Instruction::PushThisContext => {
                let this_context = ctx.stack.frame_value(frame::THIS_CONTEXT)?;
                ctx.stack.push_value(this_context)?;
                None
            }
            Instruction::PushInteger(n) => {
                let value = Value::try_from_i64(n).ok_or(VmError::Unrepresentable {
                    kind: "SmallInteger",
                })?;
                ctx.stack.push_value(value)?;
                None
            }
            Instruction::PushCharacter(c) => {
                ctx.stack.push_value(Value::from_code_point(c))?;
                None
            }
            Instruction::Dup => {
                let top = ctx.stack.peek(0)?;
                ctx.stack.push_value(top)?;
                None
            }
            Instruction::Pop => {
                ctx.stack.drop_words(1)?;
                None
            }
            Instruction::Nop => None,

            Instruction::ReturnReceiver => Some(ctx.stack.frame_receiver()?),
            Instruction::ReturnTrue => Some(vm.boolean(true)),
            Instruction::ReturnFalse => Some(vm.boolean(false)),
            Instruction::ReturnNil => Some(vm.nil()),
            Instruction::ReturnTop => Some(ctx.stack.pop_value()?),

            Instruction::SendSpecial(index) => {
                if !inline_special(vm, &mut ctx.stack, index)? {
                    let selector = *vm
                        .special_selectors
                        .get(index as usize)
                        .ok_or(VmError::MalformedBytecode(DecodeError::InvalidOperand {
                            offset: registers.pc,
                        }))?;
                    let argc = SPECIAL_SELECTORS[index as usize].1 as usize;
                    if let Some(callee) = send(vm, ctx, &registers, selector, argc)? {
                        registers = callee;
                    }
                }
                None
            }
            Instruction::Send { literal: i, argc } => {
                let selector = literal(vm, &registers, i)?;
                if let Some(callee) = send(vm, ctx, &registers, selector, argc as usize)? {
                    registers = callee;
                }
                None
            }

            Instruction::Jump(offset) => {
                registers.pc = jump_target(registers.pc, offset)?;
                None
            }
            Instruction::JumpIfTrue(offset) => {
                if condition(vm, ctx.stack.pop_value()?)? {
                    registers.pc = jump_target(registers.pc, offset)?;
                }
                None
            }
            Instruction::JumpIfFalse(offset) => {
                if !condition(vm, ctx.stack.pop_value()?)? {
                    registers.pc = jump_target(registers.pc, offset)?;
                }
                None
            }

            Instruction::PopStoreReceiverVariable(i) | Instruction::StoreReceiverVariable(i) => {
                let value = ctx.stack.peek(0)?;
                let receiver = ctx.stack.frame_receiver()?;
                vm.memory.store_pointer(receiver, i as usize, value)?;
                if matches!(instruction, Instruction::PopStoreReceiverVariable(_)) {
                    ctx.stack.drop_words(1)?;
                }
                None
            }
            Instruction::PopStoreLiteralVariable(i) | Instruction::StoreLiteralVariable(i) => {
                let value = ctx.stack.peek(0)?;
                let association = literal(vm, &registers, i)?;
                vm.memory.store_pointer(association, ASSOCIATION_VALUE, value)?;
                if matches!(instruction, Instruction::PopStoreLiteralVariable(_)) {
                    ctx.stack.drop_words(1)?;
                }
                None
            }
            Instruction::PopStoreTemp(i) | Instruction::StoreTemp(i) => {
                let value = ctx.stack.peek(0)?;
                let address = temp_address(&ctx.stack, &registers, i)?;
                ctx.stack.write_value(address, value)?;
                if matches!(instruction, Instruction::PopStoreTemp(_)) {
                    ctx.stack.drop_words(1)?;
                }
                None
            }
        };

        if let Some(value) = returned {
            match return_value(vm, &mut ctx.stack, value)? {
                Some(caller) => registers = caller,
                None => return Ok(()),
            }
        }
    }
}

fn condition(vm: &VM, value: Value) -> Result<bool, VmError> {
    if value == vm.special.true_obj {
        Ok(true)
    } else if value == vm.special.false_obj {
        Ok(false)
    } else {
        Err(VmError::NonBoolean(value))
    }
}

/// Handle special selector `index` without a lookup when the operands
/// allow it. Answers whether it did.
fn inline_special(vm: &VM, stack: &mut StackMemory, index: u8) -> Result<bool, VmError> {
    match index {
        special::IDENTICAL => {
            let b = stack.pop_value()?;
            let a = stack.pop_value()?;
            stack.push_value(vm.boolean(a == b))?;
            Ok(true)
        }
        special::CLASS => {
            let a = stack.pop_value()?;
            stack.push_value(vm.class_of(a)?)?;
            Ok(true)
        }
        special::ADD..=special::MULTIPLY => {
            let (Some(a), Some(b)) = (
                stack.peek(1)?.as_small_integer(),
                stack.peek(0)?.as_small_integer(),
            ) else {
                return Ok(false);
            };
            let result = match index {
                special::ADD => a.checked_add(b).and_then(Value::try_from_i64),
                special::SUBTRACT => a.checked_sub(b).and_then(Value::try_from_i64),
                special::MULTIPLY => a.checked_mul(b).and_then(Value::try_from_i64),
                special::LESS => Some(vm.boolean(a < b)),
                special::GREATER => Some(vm.boolean(a > b)),
                special::LESS_EQUAL => Some(vm.boolean(a <= b)),
                special::GREATER_EQUAL => Some(vm.boolean(a >= b)),
                special::EQUAL => Some(vm.boolean(a == b)),
                special::NOT_EQUAL => Some(vm.boolean(a != b)),
                _ => None,
            };
            // Overflow falls back to a real send.
            let Some(result) = result else {
                return Ok(false);
            };
            stack.drop_words(2)?;
            stack.push_value(result)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Send `selector` to the receiver `argc` slots below the top of stack.
///
/// A compiled method gets a new frame and its registers are answered.
/// Natives and the does-not-understand handler run to completion and leave
/// their result in place of the receiver and arguments.
fn send(
    vm: &mut VM,
    ctx: &mut ExecutionContext,
    registers: &Registers,
    selector: Value,
    argc: usize,
) -> Result<Option<Registers>, VmError> {
    let receiver = ctx.stack.peek(argc)?;
    let class = vm.class_of(receiver)?;
    let kind = match vm.lookup_selector(class, selector)? {
        Some(method) => Some(vm.method_kind(method)?),
        None => None,
    };

    let result = match kind {
        Some(MethodKind::Compiled(method)) => {
            let callee = activate_method_frame(vm, &mut ctx.stack, method, registers.pc, argc)?;
            return Ok(Some(callee));
        }
        Some(MethodKind::Native { arg_count, index }) => {
            let args = call_arguments(&ctx.stack, argc)?;
            vm.call_native(ctx, index, arg_count, receiver, &args)?
        }
        None => {
            let args = call_arguments(&ctx.stack, argc)?;
            vm.does_not_understand(ctx, receiver, selector, &args)?
        }
    };
    ctx.stack.drop_words(argc + 1)?;
    ctx.stack.push_value(result)?;
    Ok(None)
}

/// The top `argc` stack slots in call order.
fn call_arguments(stack: &StackMemory, argc: usize) -> Result<Vec<Value>, VmError> {
    (0..argc).map(|i| stack.peek(argc - 1 - i)).collect()
}
