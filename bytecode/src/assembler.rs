use core::fmt;

use log::{debug, trace};
use object::{ObjectFormat, ObjectMemory, Value};

use crate::error::AssemblerError;
use crate::instruction::Instruction;
use crate::method::MethodHeader;
use crate::op::{MAX_EXTENSION_BYTES, Op, encode_opcode};

/// A jump target. Created by [`Assembler::new_label`], placed with
/// [`Assembler::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Always,
    IfTrue,
    IfFalse,
}

impl JumpKind {
    fn short_op(self) -> Op {
        match self {
            Self::Always => Op::ShortJump,
            Self::IfTrue => Op::ShortJumpIfTrue,
            Self::IfFalse => Op::ShortJumpIfFalse,
        }
    }

    fn long_op(self) -> Op {
        match self {
            Self::Always => Op::LongJump,
            Self::IfTrue => Op::LongJumpIfTrue,
            Self::IfFalse => Op::LongJumpIfFalse,
        }
    }
}

/// One assembler-time instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Instruction(Instruction),
    Jump(JumpKind, Label),
    /// Zero-width marker placing a label.
    Bind(Label),
}

/// Candidate encoded sizes of a jump: short form, then long forms with
/// 0..=3 `ExtB` prefixes.
const JUMP_SIZES: [usize; 5] = [1, 2, 4, 6, 8];
const JUMP_MAX_SIZE: usize = 2 + 2 * MAX_EXTENSION_BYTES;

impl Node {
    /// Upper bound on the encoded size at any position.
    pub fn max_size(&self) -> Result<usize, AssemblerError> {
        match self {
            Node::Instruction(i) => instruction_size(*i),
            Node::Jump(..) => Ok(JUMP_MAX_SIZE),
            Node::Bind(_) => Ok(0),
        }
    }

    /// Smallest encoded size at `position`, given the current label
    /// positions.
    pub fn better_size(
        &self,
        position: usize,
        labels: &[Option<usize>],
    ) -> Result<usize, AssemblerError> {
        match self {
            Node::Jump(_, label) => {
                let target = label_position(labels, *label)?;
                JUMP_SIZES
                    .iter()
                    .copied()
                    .find(|&size| jump_fits(distance(position, size, target), size))
                    .ok_or(AssemblerError::OperandOutOfRange {
                        operand: distance(position, JUMP_MAX_SIZE, target),
                    })
            }
            _ => self.max_size(),
        }
    }

    /// Emit exactly `size` bytes at `position`.
    fn encode(
        &self,
        position: usize,
        size: usize,
        labels: &[Option<usize>],
        out: &mut Emitter,
    ) -> Result<(), AssemblerError> {
        match self {
            Node::Instruction(i) => encode_instruction(*i, out),
            Node::Jump(kind, label) => {
                let target = label_position(labels, *label)?;
                encode_jump(*kind, distance(position, size, target), size, out)
            }
            Node::Bind(_) => Ok(()),
        }
    }
}

fn label_position(labels: &[Option<usize>], label: Label) -> Result<usize, AssemblerError> {
    labels
        .get(label.0 as usize)
        .copied()
        .flatten()
        .ok_or(AssemblerError::UnboundLabel(label))
}

fn distance(position: usize, size: usize, target: usize) -> i64 {
    target as i64 - (position + size) as i64
}

/// Byte positions and sizes of every node once sizing has converged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub positions: Vec<usize>,
    pub sizes: Vec<usize>,
    pub labels: Vec<Option<usize>>,
    pub total: usize,
}

/// Assembles [`Node`]s into a CompiledMethod.
///
/// ```ignore
/// let mut asm = Assembler::new();
/// asm.push_temp(0);
/// asm.push_integer(1);
/// asm.send_special(special::ADD);
/// asm.return_top();
/// let method = asm.generate(&mut memory, compiled_method_class, 1, 0)?;
/// ```
#[derive(Debug, Default)]
pub struct Assembler {
    nodes: Vec<Node>,
    literals: Vec<Value>,
    bound: Vec<bool>,
}

impl Assembler {
    pub const MAX_LITERALS: usize = u16::MAX as usize;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn literals(&self) -> &[Value] {
        &self.literals
    }

    /// Index of `value` in the literal pool, adding it if absent.
    pub fn literal(&mut self, value: Value) -> Result<u32, AssemblerError> {
        if let Some(index) = self.literals.iter().position(|&l| l == value) {
            return Ok(index as u32);
        }
        if self.literals.len() >= Self::MAX_LITERALS {
            return Err(AssemblerError::TooManyLiterals {
                count: self.literals.len() + 1,
            });
        }
        self.literals.push(value);
        Ok((self.literals.len() - 1) as u32)
    }

    pub fn emit(&mut self, instruction: Instruction) {
        self.nodes.push(Node::Instruction(instruction));
    }

    // ── pushes ─────────────────────────────────────────────────────

    pub fn push_receiver_variable(&mut self, index: u32) {
        self.emit(Instruction::PushReceiverVariable(index));
    }

    /// Push the value of a global through its association.
    pub fn push_literal_variable(&mut self, association: Value) -> Result<(), AssemblerError> {
        let index = self.literal(association)?;
        self.emit(Instruction::PushLiteralVariable(index));
        Ok(())
    }

    pub fn push_literal(&mut self, value: Value) -> Result<(), AssemblerError> {
        let index = self.literal(value)?;
        self.emit(Instruction::PushLiteralConstant(index));
        Ok(())
    }

    pub fn push_temp(&mut self, index: u32) {
        self.emit(Instruction::PushTemp(index));
    }

    pub fn push_receiver(&mut self) {
        self.emit(Instruction::PushReceiver);
    }

    pub fn push_true(&mut self) {
        self.emit(Instruction::PushTrue);
    }

    pub fn push_false(&mut self) {
        self.emit(Instruction::PushFalse);
    }

    pub fn push_nil(&mut self) {
        self.emit(Instruction::PushNil);
    }

    pub fn push_this_context(&mut self) {
        self.emit(Instruction::PushThisContext);
    }

    /// Push an integer, inline when it fits the extended operand, as a
    /// literal otherwise.
    pub fn push_integer(&mut self, n: i64) -> Result<(), AssemblerError> {
        if signed_width(n >> 8) <= MAX_EXTENSION_BYTES {
            self.emit(Instruction::PushInteger(n));
            return Ok(());
        }
        let value = Value::try_from_i64(n).ok_or(AssemblerError::OperandOutOfRange { operand: n })?;
        self.push_literal(value)
    }

    pub fn push_character(&mut self, c: char) {
        self.emit(Instruction::PushCharacter(c as u32));
    }

    pub fn dup(&mut self) {
        self.emit(Instruction::Dup);
    }

    pub fn pop(&mut self) {
        self.emit(Instruction::Pop);
    }

    // ── stores ─────────────────────────────────────────────────────

    pub fn pop_store_receiver_variable(&mut self, index: u32) {
        self.emit(Instruction::PopStoreReceiverVariable(index));
    }

    pub fn pop_store_literal_variable(&mut self, association: Value) -> Result<(), AssemblerError> {
        let index = self.literal(association)?;
        self.emit(Instruction::PopStoreLiteralVariable(index));
        Ok(())
    }

    pub fn pop_store_temp(&mut self, index: u32) {
        self.emit(Instruction::PopStoreTemp(index));
    }

    pub fn store_receiver_variable(&mut self, index: u32) {
        self.emit(Instruction::StoreReceiverVariable(index));
    }

    pub fn store_literal_variable(&mut self, association: Value) -> Result<(), AssemblerError> {
        let index = self.literal(association)?;
        self.emit(Instruction::StoreLiteralVariable(index));
        Ok(())
    }

    pub fn store_temp(&mut self, index: u32) {
        self.emit(Instruction::StoreTemp(index));
    }

    // ── sends and returns ──────────────────────────────────────────

    /// Send `selector` (a symbol, pooled as a literal) with `argc` arguments.
    pub fn send(&mut self, selector: Value, argc: u32) -> Result<(), AssemblerError> {
        let literal = self.literal(selector)?;
        self.emit(Instruction::Send { literal, argc });
        Ok(())
    }

    /// Send special selector `index` (see [`SPECIAL_SELECTORS`]).
    ///
    /// [`SPECIAL_SELECTORS`]: crate::SPECIAL_SELECTORS
    pub fn send_special(&mut self, index: u8) {
        self.emit(Instruction::SendSpecial(index));
    }

    pub fn return_receiver(&mut self) {
        self.emit(Instruction::ReturnReceiver);
    }

    pub fn return_true(&mut self) {
        self.emit(Instruction::ReturnTrue);
    }

    pub fn return_false(&mut self) {
        self.emit(Instruction::ReturnFalse);
    }

    pub fn return_nil(&mut self) {
        self.emit(Instruction::ReturnNil);
    }

    pub fn return_top(&mut self) {
        self.emit(Instruction::ReturnTop);
    }

    pub fn nop(&mut self) {
        self.emit(Instruction::Nop);
    }

    // ── labels and jumps ───────────────────────────────────────────

    pub fn new_label(&mut self) -> Label {
        self.bound.push(false);
        Label((self.bound.len() - 1) as u32)
    }

    /// Place `label` before the next node.
    pub fn bind(&mut self, label: Label) -> Result<(), AssemblerError> {
        let slot = self
            .bound
            .get_mut(label.0 as usize)
            .ok_or(AssemblerError::UnboundLabel(label))?;
        if *slot {
            return Err(AssemblerError::LabelAlreadyBound(label));
        }
        *slot = true;
        self.nodes.push(Node::Bind(label));
        Ok(())
    }

    pub fn jump(&mut self, label: Label) {
        self.nodes.push(Node::Jump(JumpKind::Always, label));
    }

    pub fn jump_if_true(&mut self, label: Label) {
        self.nodes.push(Node::Jump(JumpKind::IfTrue, label));
    }

    pub fn jump_if_false(&mut self, label: Label) {
        self.nodes.push(Node::Jump(JumpKind::IfFalse, label));
    }

    // ── layout and emission ────────────────────────────────────────

    fn place(&self, sizes: &[usize]) -> (Vec<usize>, Vec<Option<usize>>, usize) {
        let mut positions = Vec::with_capacity(sizes.len());
        let mut labels = vec![None; self.bound.len()];
        let mut position = 0;
        for (node, size) in self.nodes.iter().zip(sizes) {
            positions.push(position);
            if let Node::Bind(label) = node {
                labels[label.0 as usize] = Some(position);
            }
            position += size;
        }
        (positions, labels, position)
    }

    /// Size every node. Starts from the worst case and shrinks sizes
    /// against the current positions until the total stops shrinking.
    /// A node's size never grows between rounds.
    pub fn layout(&self) -> Result<Layout, AssemblerError> {
        let mut sizes = self
            .nodes
            .iter()
            .map(Node::max_size)
            .collect::<Result<Vec<_>, _>>()?;
        let (mut positions, mut labels, mut total) = self.place(&sizes);

        let mut round = 0;
        loop {
            round += 1;
            let mut shrunk = Vec::with_capacity(sizes.len());
            for (i, node) in self.nodes.iter().enumerate() {
                let better = node.better_size(positions[i], &labels)?;
                shrunk.push(sizes[i].min(better));
            }
            let (new_positions, new_labels, new_total) = self.place(&shrunk);
            if new_total >= total {
                break;
            }
            sizes = shrunk;
            positions = new_positions;
            labels = new_labels;
            total = new_total;
        }
        trace!("layout converged after {round} rounds: {total} bytes");

        Ok(Layout {
            positions,
            sizes,
            labels,
            total,
        })
    }

    /// Encode the instruction stream.
    pub fn assemble(&self) -> Result<Vec<u8>, AssemblerError> {
        let layout = self.layout()?;
        let mut out = Emitter::with_limit(layout.total);
        for (i, node) in self.nodes.iter().enumerate() {
            let start = out.len();
            if start != layout.positions[i] {
                return Err(AssemblerError::EncodingOverrun { position: start });
            }
            node.encode(start, layout.sizes[i], &layout.labels, &mut out)?;
            if out.len() - start != layout.sizes[i] {
                return Err(AssemblerError::EncodingOverrun { position: out.len() });
            }
        }
        Ok(out.into_bytes())
    }

    pub fn method_header(
        &self,
        arg_count: usize,
        temp_count: usize,
    ) -> Result<MethodHeader, AssemblerError> {
        Ok(MethodHeader {
            literal_count: u16::try_from(self.literals.len()).map_err(|_| {
                AssemblerError::TooManyLiterals {
                    count: self.literals.len(),
                }
            })?,
            temp_count: u8::try_from(temp_count)
                .map_err(|_| AssemblerError::TooManyTemps { count: temp_count })?,
            arg_count: u8::try_from(arg_count)
                .map_err(|_| AssemblerError::TooManyArguments { count: arg_count })?,
        })
    }

    /// Build a CompiledMethod object of class `class_index`: header word,
    /// literals in pool order, then the instruction stream.
    pub fn generate(
        &self,
        memory: &mut ObjectMemory,
        class_index: u32,
        arg_count: usize,
        temp_count: usize,
    ) -> Result<Value, AssemblerError> {
        let header = self.method_header(arg_count, temp_count)?;
        let code = self.assemble()?;
        let start = header.initial_pc();

        let method = memory.allocate(
            0,
            start + code.len(),
            ObjectFormat::CompiledMethod,
            class_index,
            None,
        )?;
        memory.store_pointer(method, 0, Value::from_i64(header.pack()))?;
        for (i, literal) in self.literals.iter().enumerate() {
            memory.store_pointer(method, 1 + i, *literal)?;
        }

        let region = &mut memory.bytes_mut(method)?[start..];
        if region.len() != code.len() {
            return Err(AssemblerError::EncodingOverrun { position: start + region.len() });
        }
        region.copy_from_slice(&code);

        debug!(
            "generated method {method:?}: {} literals, {} bytes of code, {arg_count} args, {temp_count} temps",
            self.literals.len(),
            code.len()
        );
        Ok(method)
    }
}

// ── encoding ───────────────────────────────────────────────────────

/// Byte sink that refuses to grow past a precomputed limit.
struct Emitter {
    buf: Vec<u8>,
    limit: usize,
}

impl Emitter {
    fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit.min(1 << 16)),
            limit,
        }
    }

    fn unbounded() -> Self {
        Self {
            buf: Vec::new(),
            limit: usize::MAX,
        }
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn byte(&mut self, byte: u8) -> Result<(), AssemblerError> {
        if self.buf.len() >= self.limit {
            return Err(AssemblerError::EncodingOverrun {
                position: self.buf.len(),
            });
        }
        self.buf.push(byte);
        Ok(())
    }

    fn op(&mut self, op: Op, embedded: u32) -> Result<(), AssemblerError> {
        let byte = encode_opcode(op, embedded).ok_or(AssemblerError::OperandOutOfRange {
            operand: embedded as i64,
        })?;
        self.byte(byte)
    }
}

/// Bytes needed to carry `ext` through `ExtA` prefixes.
fn unsigned_width(ext: u64) -> usize {
    ((u64::BITS - ext.leading_zeros()) as usize).div_ceil(8)
}

/// Bytes needed to carry `ext` through `ExtB` prefixes, the first one
/// sign-extended.
fn signed_width(ext: i64) -> usize {
    if ext == 0 {
        return 0;
    }
    let bits = if ext < 0 {
        i64::BITS - ext.leading_ones() + 1
    } else {
        i64::BITS - ext.leading_zeros() + 1
    };
    (bits as usize).div_ceil(8)
}

fn emit_ext_a(out: &mut Emitter, ext: u64, width: usize) -> Result<(), AssemblerError> {
    for i in (0..width).rev() {
        out.op(Op::ExtA, 0)?;
        out.byte((ext >> (8 * i)) as u8)?;
    }
    Ok(())
}

fn emit_ext_b(out: &mut Emitter, ext: i64, width: usize) -> Result<(), AssemblerError> {
    for i in (0..width).rev() {
        out.op(Op::ExtB, 0)?;
        out.byte((ext >> (8 * i)) as u8)?;
    }
    Ok(())
}

/// `[ExtA..] op byte` for an unsigned operand.
fn emit_long_unsigned(out: &mut Emitter, op: Op, operand: u32) -> Result<(), AssemblerError> {
    let ext = operand as u64 >> 8;
    let width = unsigned_width(ext);
    if width > MAX_EXTENSION_BYTES {
        return Err(AssemblerError::OperandOutOfRange {
            operand: operand as i64,
        });
    }
    emit_ext_a(out, ext, width)?;
    out.op(op, 0)?;
    out.byte(operand as u8)
}

/// `[ExtB..] op byte` for a signed operand, padded to `width` prefixes.
fn emit_long_signed(out: &mut Emitter, op: Op, operand: i64, width: usize) -> Result<(), AssemblerError> {
    emit_ext_b(out, operand >> 8, width)?;
    out.op(op, 0)?;
    out.byte(operand as u8)
}

fn emit_indexed(out: &mut Emitter, short: Option<Op>, long: Op, index: u32) -> Result<(), AssemblerError> {
    if let Some(short) = short
        && let Some(byte) = encode_opcode(short, index)
    {
        return out.byte(byte);
    }
    emit_long_unsigned(out, long, index)
}

fn jump_fits(distance: i64, size: usize) -> bool {
    if size == 1 {
        return (1..=8).contains(&distance);
    }
    size >= 2
        && size % 2 == 0
        && (size - 2) / 2 <= MAX_EXTENSION_BYTES
        && signed_width(distance >> 8) <= (size - 2) / 2
}

fn encode_jump(kind: JumpKind, distance: i64, size: usize, out: &mut Emitter) -> Result<(), AssemblerError> {
    if !jump_fits(distance, size) {
        return Err(AssemblerError::EncodingOverrun { position: out.len() });
    }
    if size == 1 {
        return out.op(kind.short_op(), (distance - 1) as u32);
    }
    emit_long_signed(out, kind.long_op(), distance, (size - 2) / 2)
}

/// Shortest encoding of `instruction`.
fn encode_instruction(instruction: Instruction, out: &mut Emitter) -> Result<(), AssemblerError> {
    use Instruction as I;

    match instruction {
        I::PushReceiverVariable(i) => emit_indexed(
            out,
            Some(Op::PushReceiverVariable),
            Op::LongPushReceiverVariable,
            i,
        ),
        I::PushLiteralVariable(i) => emit_indexed(
            out,
            Some(Op::PushLiteralVariable),
            Op::LongPushLiteralVariable,
            i,
        ),
        I::PushLiteralConstant(i) => emit_indexed(
            out,
            Some(Op::PushLiteralConstant),
            Op::LongPushLiteralConstant,
            i,
        ),
        I::PushTemp(i) => emit_indexed(out, Some(Op::PushTemp), Op::LongPushTemp, i),
        I::PushReceiver => out.op(Op::PushReceiver, 0),
        I::PushTrue => out.op(Op::PushTrue, 0),
        I::PushFalse => out.op(Op::PushFalse, 0),
        I::PushNil => out.op(Op::PushNil, 0),
        I::PushThisContext => out.op(Op::PushThisContext, 0),
        I::PushInteger(0) => out.op(Op::PushZero, 0),
        I::PushInteger(1) => out.op(Op::PushOne, 0),
        I::PushInteger(n) => {
            let width = signed_width(n >> 8);
            if width > MAX_EXTENSION_BYTES {
                return Err(AssemblerError::OperandOutOfRange { operand: n });
            }
            emit_long_signed(out, Op::PushInteger, n, width)
        }
        I::PushCharacter(c) => emit_long_unsigned(out, Op::PushCharacter, c),
        I::Dup => out.op(Op::Dup, 0),
        I::Pop => out.op(Op::Pop, 0),

        I::ReturnReceiver => out.op(Op::ReturnReceiver, 0),
        I::ReturnTrue => out.op(Op::ReturnTrue, 0),
        I::ReturnFalse => out.op(Op::ReturnFalse, 0),
        I::ReturnNil => out.op(Op::ReturnNil, 0),
        I::ReturnTop => out.op(Op::ReturnTop, 0),
        I::Nop => out.op(Op::Nop, 0),

        I::SendSpecial(i) if i < 16 => out.op(Op::SendArithmetic, i as u32),
        I::SendSpecial(i) => out.op(Op::SendSpecial, i as u32 - 16),
        I::Send { literal, argc } => {
            let short = match argc {
                0 => Some(Op::Send0),
                1 => Some(Op::Send1),
                2 => Some(Op::Send2),
                _ => None,
            };
            if let Some(op) = short
                && let Some(byte) = encode_opcode(op, literal)
            {
                return out.byte(byte);
            }
            let ext_a = literal as u64 >> 5;
            let ext_b = argc as i64 >> 3;
            let (width_a, width_b) = (unsigned_width(ext_a), signed_width(ext_b));
            if width_a + width_b > MAX_EXTENSION_BYTES {
                return Err(AssemblerError::OperandOutOfRange {
                    operand: literal.max(argc) as i64,
                });
            }
            emit_ext_a(out, ext_a, width_a)?;
            emit_ext_b(out, ext_b, width_b)?;
            out.op(Op::LongSend, 0)?;
            out.byte((((literal & 31) << 3) | (argc & 7)) as u8)
        }

        I::Jump(d) => encode_jump_shortest(JumpKind::Always, d, out),
        I::JumpIfTrue(d) => encode_jump_shortest(JumpKind::IfTrue, d, out),
        I::JumpIfFalse(d) => encode_jump_shortest(JumpKind::IfFalse, d, out),

        I::PopStoreReceiverVariable(i) => emit_indexed(
            out,
            Some(Op::PopStoreReceiverVariable),
            Op::LongPopStoreReceiverVariable,
            i,
        ),
        I::PopStoreLiteralVariable(i) => {
            emit_indexed(out, None, Op::LongPopStoreLiteralVariable, i)
        }
        I::PopStoreTemp(i) => emit_indexed(out, Some(Op::PopStoreTemp), Op::LongPopStoreTemp, i),
        I::StoreReceiverVariable(i) => emit_indexed(out, None, Op::LongStoreReceiverVariable, i),
        I::StoreLiteralVariable(i) => emit_indexed(out, None, Op::LongStoreLiteralVariable, i),
        I::StoreTemp(i) => emit_indexed(out, None, Op::LongStoreTemp, i),
    }
}

/// A raw jump with a fixed distance, independent of its position.
fn encode_jump_shortest(kind: JumpKind, distance: i64, out: &mut Emitter) -> Result<(), AssemblerError> {
    let size = JUMP_SIZES
        .iter()
        .copied()
        .find(|&size| jump_fits(distance, size))
        .ok_or(AssemblerError::OperandOutOfRange { operand: distance })?;
    encode_jump(kind, distance, size, out)
}

fn instruction_size(instruction: Instruction) -> Result<usize, AssemblerError> {
    let mut out = Emitter::unbounded();
    encode_instruction(instruction, &mut out)?;
    Ok(out.len())
}
