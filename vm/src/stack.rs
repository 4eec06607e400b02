use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use log::debug;
use object::{Value, WORD_SIZE};
use parking_lot::Mutex;

use crate::VM;
use crate::error::VmError;

/// Byte offsets of frame fields relative to the frame pointer.
///
/// ```text
/// fp + 16 + 8*(argc-1-i) : argument i          (pushed by the caller)
/// fp + 16 + 8*argc       : receiver            (pushed by the caller)
/// fp + 8                 : return pc, 0 for an entry frame
/// fp + 0                 : previous fp
/// fp - 8                 : method
/// fp - 16                : metadata
/// fp - 24                : this context
/// fp - 32                : receiver
/// fp - 40 - 8*j          : temporary j
/// ```
pub mod frame {
    pub const RETURN_PC: isize = 8;
    pub const PREVIOUS_FP: isize = 0;
    pub const METHOD: isize = -8;
    pub const METADATA: isize = -16;
    pub const THIS_CONTEXT: isize = -24;
    pub const RECEIVER: isize = -32;
    pub const FIRST_TEMP: isize = -40;
    pub const FIRST_ARGUMENT: isize = 16;
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        const IS_BLOCK = 1 << 0;
        const HAS_CONTEXT = 1 << 1;
    }
}

/// The packed metadata word: argument count in the low byte, is-block in
/// the next byte, has-context in the byte after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub arg_count: u8,
    pub flags: FrameFlags,
}

impl FrameMetadata {
    pub fn new(arg_count: u8) -> Self {
        Self {
            arg_count,
            flags: FrameFlags::empty(),
        }
    }

    pub fn pack(self) -> u64 {
        let is_block = self.flags.contains(FrameFlags::IS_BLOCK) as u64;
        let has_context = self.flags.contains(FrameFlags::HAS_CONTEXT) as u64;
        self.arg_count as u64 | is_block << 8 | has_context << 16
    }

    pub fn unpack(word: u64) -> Self {
        let mut flags = FrameFlags::empty();
        flags.set(FrameFlags::IS_BLOCK, (word >> 8) & 0xFF != 0);
        flags.set(FrameFlags::HAS_CONTEXT, (word >> 16) & 0xFF != 0);
        Self {
            arg_count: (word & 0xFF) as u8,
            flags,
        }
    }
}

/// A fixed-size, downward-growing stack of words.
///
/// Addresses are byte offsets into the buffer. `sp` points at the last
/// pushed word; `fp` is 0 while no frame is active.
#[derive(Debug)]
pub struct StackMemory {
    bytes: Vec<u8>,
    sp: usize,
    fp: usize,
}

impl StackMemory {
    pub fn new(size: usize) -> Self {
        let size = size - size % WORD_SIZE;
        Self {
            bytes: vec![0; size],
            sp: size,
            fp: 0,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn sp(&self) -> usize {
        self.sp
    }

    #[inline]
    pub fn fp(&self) -> usize {
        self.fp
    }

    pub fn set_fp(&mut self, fp: usize) {
        self.fp = fp;
    }

    /// Move `sp` to `sp`. Only addresses inside the buffer are accepted.
    pub fn set_sp(&mut self, sp: usize) -> Result<(), VmError> {
        if sp > self.size() {
            return Err(VmError::StackUnderflow);
        }
        self.sp = sp;
        Ok(())
    }

    /// Number of words currently pushed.
    pub fn depth(&self) -> usize {
        (self.size() - self.sp) / WORD_SIZE
    }

    pub fn save(&self) -> (usize, usize) {
        (self.sp, self.fp)
    }

    pub fn restore(&mut self, (sp, fp): (usize, usize)) {
        self.sp = sp;
        self.fp = fp;
    }

    // ── push / pop ─────────────────────────────────────────────────

    pub fn push_uword(&mut self, word: u64) -> Result<(), VmError> {
        if self.sp < WORD_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.sp -= WORD_SIZE;
        self.bytes[self.sp..self.sp + WORD_SIZE].copy_from_slice(&word.to_le_bytes());
        Ok(())
    }

    pub fn push_value(&mut self, value: Value) -> Result<(), VmError> {
        self.push_uword(value.raw())
    }

    /// Push a stack address.
    pub fn push_pointer(&mut self, address: usize) -> Result<(), VmError> {
        self.push_uword(address as u64)
    }

    pub fn pop_uword(&mut self) -> Result<u64, VmError> {
        let word = self.read_uword(self.sp)?;
        self.sp += WORD_SIZE;
        Ok(word)
    }

    pub fn pop_value(&mut self) -> Result<Value, VmError> {
        self.pop_uword().map(Value::from_raw)
    }

    pub fn pop_pointer(&mut self) -> Result<usize, VmError> {
        self.pop_uword().map(|w| w as usize)
    }

    /// Drop `count` words.
    pub fn drop_words(&mut self, count: usize) -> Result<(), VmError> {
        self.set_sp(self.sp + count * WORD_SIZE)
    }

    /// The word `depth` slots below the top, 0 being the top.
    pub fn peek(&self, depth: usize) -> Result<Value, VmError> {
        self.read_value(self.sp + depth * WORD_SIZE)
    }

    // ── addressed access ───────────────────────────────────────────

    /// Read a live word at `address`.
    pub fn read_uword(&self, address: usize) -> Result<u64, VmError> {
        if address < self.sp || address + WORD_SIZE > self.size() {
            return Err(VmError::StackUnderflow);
        }
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(&self.bytes[address..address + WORD_SIZE]);
        Ok(u64::from_le_bytes(word))
    }

    pub fn write_uword(&mut self, address: usize, word: u64) -> Result<(), VmError> {
        if address < self.sp || address + WORD_SIZE > self.size() {
            return Err(VmError::StackUnderflow);
        }
        self.bytes[address..address + WORD_SIZE].copy_from_slice(&word.to_le_bytes());
        Ok(())
    }

    pub fn read_value(&self, address: usize) -> Result<Value, VmError> {
        self.read_uword(address).map(Value::from_raw)
    }

    pub fn write_value(&mut self, address: usize, value: Value) -> Result<(), VmError> {
        self.write_uword(address, value.raw())
    }

    /// Address of a field at `offset` bytes from the frame pointer.
    pub fn frame_address(&self, offset: isize) -> Result<usize, VmError> {
        self.fp
            .checked_add_signed(offset)
            .ok_or(VmError::StackUnderflow)
    }

    pub fn frame_uword(&self, offset: isize) -> Result<u64, VmError> {
        self.read_uword(self.frame_address(offset)?)
    }

    pub fn frame_value(&self, offset: isize) -> Result<Value, VmError> {
        self.read_value(self.frame_address(offset)?)
    }

    // ── frame fields ───────────────────────────────────────────────

    pub fn frame_method(&self) -> Result<Value, VmError> {
        self.frame_value(frame::METHOD)
    }

    pub fn frame_metadata(&self) -> Result<FrameMetadata, VmError> {
        self.frame_uword(frame::METADATA).map(FrameMetadata::unpack)
    }

    pub fn frame_receiver(&self) -> Result<Value, VmError> {
        self.frame_value(frame::RECEIVER)
    }

    pub fn frame_return_pc(&self) -> Result<usize, VmError> {
        self.frame_uword(frame::RETURN_PC).map(|w| w as usize)
    }

    /// Address of argument `index` in a frame taking `arg_count` arguments.
    pub fn argument_address(&self, arg_count: usize, index: usize) -> Result<usize, VmError> {
        let offset = frame::FIRST_ARGUMENT + (WORD_SIZE * (arg_count - 1 - index)) as isize;
        self.frame_address(offset)
    }

    /// Address of temporary `index`. Indices below `arg_count` name
    /// arguments, the rest name frame temporaries.
    pub fn temp_address(
        &self,
        arg_count: usize,
        temp_count: usize,
        index: usize,
    ) -> Result<usize, VmError> {
        if index < arg_count {
            return self.argument_address(arg_count, index);
        }
        let temp = index - arg_count;
        if temp >= temp_count {
            return Err(VmError::TempOutOfRange {
                index: index as u32,
            });
        }
        self.frame_address(frame::FIRST_TEMP - (WORD_SIZE * temp) as isize)
    }
}

/// Identifies one registered stack.
pub type ContextId = u64;

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: ContextId,
    stacks: HashMap<ContextId, usize>,
}

/// VM-wide record of live execution stacks.
#[derive(Debug, Clone, Default)]
pub struct StackRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl StackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, size: usize) -> ContextId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.stacks.insert(id, size);
        debug!("registered stack {id} ({size} bytes)");
        id
    }

    fn unregister(&self, id: ContextId) {
        self.inner.lock().stacks.remove(&id);
        debug!("unregistered stack {id}");
    }

    /// Number of live stacks.
    pub fn len(&self) -> usize {
        self.inner.lock().stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.inner.lock().stacks.contains_key(&id)
    }
}

/// One thread of execution: a stack registered with its VM for as long as
/// this handle lives.
#[derive(Debug)]
pub struct ExecutionContext {
    pub stack: StackMemory,
    id: ContextId,
    registry: StackRegistry,
}

impl ExecutionContext {
    pub fn new(vm: &VM) -> Self {
        Self::with_registry(&vm.stacks, vm.settings.stack_size)
    }

    pub fn with_registry(registry: &StackRegistry, stack_size: usize) -> Self {
        let stack = StackMemory::new(stack_size);
        let id = registry.register(stack.size());
        Self {
            stack,
            id,
            registry: registry.clone(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_packing() {
        let mut m = FrameMetadata::new(3);
        assert_eq!(m.pack(), 3);
        m.flags = FrameFlags::IS_BLOCK | FrameFlags::HAS_CONTEXT;
        assert_eq!(m.pack(), 3 | 1 << 8 | 1 << 16);
        assert_eq!(FrameMetadata::unpack(m.pack()), m);
    }

    #[test]
    fn push_pop_and_bounds() {
        let mut s = StackMemory::new(32);
        assert_eq!(s.depth(), 0);
        s.push_value(Value::from_i64(1)).unwrap();
        s.push_uword(7).unwrap();
        s.push_pointer(16).unwrap();
        s.push_value(Value::from_char('a')).unwrap();
        assert_eq!(s.push_uword(0), Err(VmError::StackOverflow));
        assert_eq!(s.depth(), 4);
        assert_eq!(s.peek(3).unwrap(), Value::from_i64(1));

        assert_eq!(s.pop_value().unwrap(), Value::from_char('a'));
        assert_eq!(s.pop_pointer().unwrap(), 16);
        assert_eq!(s.pop_uword().unwrap(), 7);
        assert_eq!(s.pop_value().unwrap(), Value::from_i64(1));
        assert_eq!(s.pop_uword(), Err(VmError::StackUnderflow));
    }

    #[test]
    fn dead_words_are_not_addressable() {
        let mut s = StackMemory::new(64);
        s.push_uword(1).unwrap();
        let below_sp = s.sp() - WORD_SIZE;
        assert_eq!(s.read_uword(below_sp), Err(VmError::StackUnderflow));
        assert_eq!(s.write_uword(64, 0), Err(VmError::StackUnderflow));
    }

    #[test]
    fn temp_addressing() {
        let mut s = StackMemory::new(256);
        // receiver, arg0, arg1, return pc, previous fp
        for w in [100u64, 101, 102, 0, 0] {
            s.push_uword(w).unwrap();
        }
        s.set_fp(s.sp());
        for w in [0u64, 2, 0, 100, 200, 201] {
            s.push_uword(w).unwrap();
        }
        let addr = |i| s.temp_address(2, 2, i).unwrap();
        assert_eq!(s.read_uword(addr(0)).unwrap(), 101);
        assert_eq!(s.read_uword(addr(1)).unwrap(), 102);
        assert_eq!(s.read_uword(addr(2)).unwrap(), 200);
        assert_eq!(s.read_uword(addr(3)).unwrap(), 201);
        assert_eq!(
            s.temp_address(2, 2, 4),
            Err(VmError::TempOutOfRange { index: 4 })
        );
        assert_eq!(s.frame_uword(frame::FIRST_ARGUMENT + 16).unwrap(), 100);
    }

    #[test]
    fn contexts_register_and_unregister() {
        let registry = StackRegistry::new();
        let a = ExecutionContext::with_registry(&registry, 1024);
        let b = ExecutionContext::with_registry(&registry, 1024);
        assert_eq!(registry.len(), 2);
        assert_ne!(a.id(), b.id());
        let id = a.id();
        drop(a);
        assert!(!registry.contains(id));
        assert!(registry.contains(b.id()));
        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn contexts_on_other_threads_share_the_registry() {
        let registry = StackRegistry::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let ctx = ExecutionContext::with_registry(&registry, 512);
                    ctx.stack.size()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 512);
        }
        assert!(registry.is_empty());
    }
}
