use std::sync::Arc;

use bytecode::CompiledMethod;
use log::{debug, warn};
use object::{ObjectFormat, Value};

use crate::VM;
use crate::error::VmError;
use crate::interpreter;
use crate::primitives::{NativeMethodDescriptor, NativeSlot};
use crate::special::class_index;
use crate::stack::ExecutionContext;

/// Fallback for failed lookups. Receives the receiver, the selector and the
/// arguments in call order. Whatever it answers becomes the result of the
/// send.
pub type DoesNotUnderstandHandler = Arc<
    dyn Fn(&mut VM, &mut ExecutionContext, Value, Value, &[Value]) -> Result<Value, VmError>
        + Send
        + Sync,
>;

/// What a method dictionary value turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Compiled(CompiledMethod),
    Native { arg_count: usize, index: usize },
}

impl VM {
    /// Find `selector` along the superclass chain of `class`.
    pub fn lookup_selector(&self, class: Value, selector: Value) -> Result<Option<Value>, VmError> {
        let nil = self.nil();
        let mut current = class;
        let mut depth = 0;
        while current != nil {
            if depth > self.class_table.len() {
                return Err(VmError::SuperclassCycle { class });
            }
            let dict = self.method_dictionary(current)?;
            if let Some(method) = dict.at(&self.memory, selector)? {
                return Ok(Some(method));
            }
            current = self.superclass(current)?;
            depth += 1;
        }
        Ok(None)
    }

    pub fn method_kind(&self, method: Value) -> Result<MethodKind, VmError> {
        if let Some(compiled) = CompiledMethod::from_value(&self.memory, method) {
            return Ok(MethodKind::Compiled(compiled));
        }
        if method.is_object() && self.memory.class_index_of(method)? == class_index::NATIVE_METHOD {
            let field = |slot| -> Result<usize, VmError> {
                let v = self.memory.fetch_pointer(method, slot)?;
                v.as_small_integer()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or(VmError::NotAMethod(method))
            };
            return Ok(MethodKind::Native {
                arg_count: field(NativeSlot::ARGUMENT_COUNT)?,
                index: field(NativeSlot::INDEX)?,
            });
        }
        Err(VmError::NotAMethod(method))
    }

    /// Send `selector` to `receiver` from native code.
    ///
    /// Compiled methods run on `ctx`'s stack. Native methods are called
    /// directly. A failed lookup goes to the does-not-understand handler.
    pub fn send(
        &mut self,
        ctx: &mut ExecutionContext,
        receiver: Value,
        selector: Value,
        args: &[Value],
    ) -> Result<Value, VmError> {
        let class = self.class_of(receiver)?;
        let Some(method) = self.lookup_selector(class, selector)? else {
            return self.does_not_understand(ctx, receiver, selector, args);
        };
        match self.method_kind(method)? {
            MethodKind::Compiled(method) => {
                interpreter::execute_method(self, ctx, method, receiver, args)
            }
            MethodKind::Native { arg_count, index } => {
                self.call_native(ctx, index, arg_count, receiver, args)
            }
        }
    }

    /// Intern `selector` and send it.
    pub fn send_named(
        &mut self,
        ctx: &mut ExecutionContext,
        receiver: Value,
        selector: &str,
        args: &[Value],
    ) -> Result<Value, VmError> {
        let selector = self.intern(selector)?;
        self.send(ctx, receiver, selector, args)
    }

    pub(crate) fn call_native(
        &mut self,
        ctx: &mut ExecutionContext,
        index: usize,
        arg_count: usize,
        receiver: Value,
        args: &[Value],
    ) -> Result<Value, VmError> {
        if args.len() != arg_count {
            return Err(VmError::ArgumentCountMismatch {
                expected: arg_count,
                got: args.len(),
            });
        }
        let function = *self
            .natives
            .get(index)
            .ok_or(VmError::NotAMethod(Value::from_i64(index as i64)))?;
        function(self, ctx, receiver, args)
    }

    pub(crate) fn does_not_understand(
        &mut self,
        ctx: &mut ExecutionContext,
        receiver: Value,
        selector: Value,
        args: &[Value],
    ) -> Result<Value, VmError> {
        warn!(
            "{} does not understand #{}",
            self.print_string(receiver),
            self.symbol_name(selector).unwrap_or_else(|| format!("{selector:?}"))
        );
        match self.does_not_understand.clone() {
            Some(handler) => handler(self, ctx, receiver, selector, args),
            None => Err(VmError::DoesNotUnderstand { receiver, selector }),
        }
    }

    /// Replace the does-not-understand handler. `None` restores the default,
    /// which fails the send with [`VmError::DoesNotUnderstand`].
    pub fn set_does_not_understand(&mut self, handler: Option<DoesNotUnderstandHandler>) {
        self.does_not_understand = handler;
    }

    /// Add each descriptor to `class` as a NativeMethod object.
    pub fn install_native_methods(
        &mut self,
        class: Value,
        methods: &[NativeMethodDescriptor],
    ) -> Result<(), VmError> {
        let dict = self.method_dictionary(class)?;
        for desc in methods {
            let selector = self.intern(desc.selector)?;
            let index = self.natives.len();
            self.natives.push(desc.function);

            let native = self.memory.allocate(
                NativeSlot::SIZE,
                0,
                ObjectFormat::FixedSize,
                class_index::NATIVE_METHOD,
                None,
            )?;
            self.memory.store_pointer(native, NativeSlot::SELECTOR, selector)?;
            self.memory.store_pointer(
                native,
                NativeSlot::ARGUMENT_COUNT,
                Value::from_i64(desc.arity as i64),
            )?;
            self.memory
                .store_pointer(native, NativeSlot::INDEX, Value::from_i64(index as i64))?;
            dict.at_put(&mut self.memory, selector, native)?;
        }
        debug!(
            "installed {} native methods on {}",
            methods.len(),
            self.class_name(class).unwrap_or_default()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::VmSettings;
    use crate::primitives::argument;

    fn vm() -> VM {
        VM::new(VmSettings::default()).unwrap()
    }

    #[test]
    fn lookup_walks_superclasses() {
        let mut vm = vm();
        let symbol = vm.class_at(class_index::SYMBOL).unwrap();
        let string = vm.class_at(class_index::STRING).unwrap();
        let size = vm.intern("size").unwrap();
        let yourself = vm.intern("yourself").unwrap();
        let missing = vm.intern("frobnicate").unwrap();

        let found = vm.lookup_selector(symbol, size).unwrap().unwrap();
        assert_eq!(vm.method_dictionary(string).unwrap().at(&vm.memory, size).unwrap(), Some(found));
        assert!(vm.lookup_selector(symbol, yourself).unwrap().is_some());
        assert_eq!(vm.lookup_selector(symbol, missing).unwrap(), None);
    }

    #[test]
    fn native_sends() {
        let mut vm = vm();
        let mut ctx = ExecutionContext::new(&vm);
        let r = vm
            .send_named(&mut ctx, Value::from_i64(3), "+", &[Value::from_i64(4)])
            .unwrap();
        assert_eq!(r, Value::from_i64(7));
        assert_eq!(ctx.stack.depth(), 0);

        assert_eq!(
            vm.send_named(&mut ctx, Value::from_i64(3), "+", &[]),
            Err(VmError::ArgumentCountMismatch { expected: 1, got: 0 })
        );
    }

    #[test]
    fn default_does_not_understand_is_recoverable() {
        let mut vm = vm();
        let mut ctx = ExecutionContext::new(&vm);
        let selector = vm.intern("frobnicate").unwrap();
        let err = vm
            .send(&mut ctx, Value::from_i64(1), selector, &[])
            .unwrap_err();
        assert_eq!(
            err,
            VmError::DoesNotUnderstand {
                receiver: Value::from_i64(1),
                selector
            }
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn handler_sees_the_failed_send() {
        let mut vm = vm();
        let mut ctx = ExecutionContext::new(&vm);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        vm.set_does_not_understand(Some(Arc::new(
            move |vm: &mut VM, _ctx: &mut ExecutionContext, receiver: Value, _selector: Value, args: &[Value]| -> Result<Value, VmError> {
            seen.fetch_add(1, Ordering::SeqCst);
            assert_eq!(receiver, Value::from_char('q'));
            Ok(Value::from_i64(argument::<i64>(vm, args, 0)? * 2))
        },
        )));
        let r = vm
            .send_named(&mut ctx, Value::from_char('q'), "double:", &[Value::from_i64(21)])
            .unwrap();
        assert_eq!(r, Value::from_i64(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        vm.set_does_not_understand(None);
        assert!(vm.send_named(&mut ctx, Value::from_char('q'), "double:", &[Value::from_i64(1)]).is_err());
    }

    #[test]
    fn non_methods_in_dictionaries_are_rejected() {
        let mut vm = vm();
        let object = vm.class_at(class_index::OBJECT).unwrap();
        let selector = vm.intern("broken").unwrap();
        vm.add_method(object, selector, Value::from_i64(5)).unwrap();
        let mut ctx = ExecutionContext::new(&vm);
        assert_eq!(
            vm.send(&mut ctx, vm.nil(), selector, &[]),
            Err(VmError::NotAMethod(Value::from_i64(5)))
        );
    }
}
