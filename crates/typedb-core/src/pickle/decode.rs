//! Stack-machine decoder for the pickle-like database format.
//!
//! The decoder understands protocols 0 through 2 of the Python pickle format,
//! minus class construction: `GLOBAL` pushes `None`, and object-building
//! opcodes (`REDUCE`, `BUILD`, `INST`, `OBJ`, `NEWOBJ`) are rejected as
//! malformed. Dicts decode to string-keyed mappings, lists and tuples to
//! their [`RawValue`] counterparts.
//!
//! # Memo Semantics
//!
//! Pickle memoizes mutable containers right after creating them and fills
//! them later, so a `GET` must observe the filled container. Memo entries
//! that point at a container still on the stack are recorded as pending and
//! snapshotted when the container leaves the stack.
//!
//! Every copy made for a memo reference counts against a limit that grows
//! with the input length (see [`MAX_COPIED_NODES`]). Containers nested
//! deeper than [`MAX_DEPTH`] are rejected.
//!
//! # Prefix Salvage
//!
//! [`decode_prefix`] recovers whatever was completely decoded before a
//! failure. Unfinished containers are those with an open `MARK` above them,
//! plus a freshly created container at the top of the stack. The caller picks
//! how many outermost unfinished containers to keep; anything nested deeper
//! is dropped along with the key that would have held it.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::opcodes as op;
use super::value::RawValue;
use super::{
    DecodeError, DecodeResult, COPIES_PER_BYTE, MAX_COPIED_NODES, MAX_DEPTH, MAX_PROTOCOL,
};

/// Decode exactly one value from `bytes`.
pub fn decode(bytes: &[u8]) -> DecodeResult<RawValue> {
    Unpickler::new(bytes).load()
}

/// Outcome of [`decode_prefix`].
#[derive(Debug, Clone, PartialEq)]
pub struct PartialDecode {
    /// The decoded value, or the salvaged prefix when `error` is set.
    pub value: Option<RawValue>,
    /// The failure that stopped decoding, if any.
    pub error: Option<DecodeError>,
}

impl PartialDecode {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Decode one value, salvaging the completed prefix on failure.
///
/// `keep_open` is the number of outermost unfinished containers whose
/// completed entries are kept. With `keep_open = 0` nothing is salvaged.
pub fn decode_prefix(bytes: &[u8], keep_open: usize) -> PartialDecode {
    let mut unpickler = Unpickler::new(bytes);
    match unpickler.load() {
        Ok(value) => PartialDecode {
            value: Some(value),
            error: None,
        },
        Err(error) => {
            debug!("salvaging prefix after decode failure: {}", error);
            PartialDecode {
                value: unpickler.salvage(keep_open),
                error: Some(error),
            }
        }
    }
}

// ============================================================================
// Stack
// ============================================================================

/// Nesting depth and node count of a decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Shape {
    depth: usize,
    nodes: usize,
}

impl Shape {
    const SCALAR: Shape = Shape { depth: 0, nodes: 1 };
    const EMPTY: Shape = Shape { depth: 1, nodes: 1 };

    /// The shape of this container after `child` is stored in it.
    fn holding(self, child: Shape) -> Shape {
        Shape {
            depth: self.depth.max(child.depth.saturating_add(1)),
            nodes: self.nodes.saturating_add(child.nodes),
        }
    }

    fn holding_all<'s>(self, children: impl IntoIterator<Item = &'s Shape>) -> Shape {
        children.into_iter().fold(self, |shape, child| shape.holding(*child))
    }

    fn check(self, at: usize) -> DecodeResult<Shape> {
        if self.depth > MAX_DEPTH {
            return Err(DecodeError::malformed(
                at,
                format!("nesting deeper than {} levels", MAX_DEPTH),
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Mark,
    Value(RawValue, Shape),
}

/// Memo entry: either a finished value or a container still on the stack.
#[derive(Debug, Clone)]
enum MemoEntry {
    Value(RawValue, Shape),
    OnStack(usize),
}

/// A pickle stream reader positioned over a byte slice.
///
/// Successive [`Unpickler::load`] calls decode successive values; the memo
/// persists between them, as in Python.
pub struct Unpickler<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Slot>,
    memo: HashMap<u32, MemoEntry>,
    /// True while the top of the stack is a container created by the last
    /// value-producing opcode and not yet populated.
    fresh: bool,
    /// Nodes copied by memo and `DUP` references during the current load.
    copied: usize,
    copy_limit: usize,
}

impl<'a> Unpickler<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::with_capacity(32),
            memo: HashMap::new(),
            fresh: false,
            copied: 0,
            copy_limit: MAX_COPIED_NODES
                .saturating_add(data.len().saturating_mul(COPIES_PER_BYTE)),
        }
    }

    /// Replace the copy limit derived from the input length.
    pub fn with_copy_limit(mut self, limit: usize) -> Self {
        self.copy_limit = limit;
        self
    }

    /// Byte offset of the next unread opcode.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Decode the next value, advancing past its `STOP` opcode.
    pub fn load(&mut self) -> DecodeResult<RawValue> {
        self.stack.clear();
        self.fresh = false;
        self.copied = 0;
        loop {
            let at = self.pos;
            let opcode = self.read_u8()?;
            if opcode != op::PUT && opcode != op::BINPUT && opcode != op::LONG_BINPUT {
                self.fresh = false;
            }
            match opcode {
                op::STOP => return self.pop(at).map(|(value, _)| value),
                op::MARK => self.stack.push(Slot::Mark),
                op::PROTO => {
                    let protocol = self.read_u8()?;
                    if protocol > MAX_PROTOCOL {
                        return Err(DecodeError::UnsupportedVersion { protocol });
                    }
                }
                op::NONE => self.push(RawValue::None),
                op::NEWTRUE => self.push(RawValue::Bool(true)),
                op::NEWFALSE => self.push(RawValue::Bool(false)),
                op::INT => {
                    let line = self.read_line()?;
                    let value = match line.as_str() {
                        "00" => RawValue::Bool(false),
                        "01" => RawValue::Bool(true),
                        text => parse_int(text, at)?,
                    };
                    self.push(value);
                }
                op::BININT => {
                    let value = i32::from_le_bytes(self.read_array()?);
                    self.push(RawValue::Int(i64::from(value)));
                }
                op::BININT1 => {
                    let value = self.read_u8()?;
                    self.push(RawValue::Int(i64::from(value)));
                }
                op::BININT2 => {
                    let value = u16::from_le_bytes(self.read_array()?);
                    self.push(RawValue::Int(i64::from(value)));
                }
                op::LONG => {
                    let line = self.read_line()?;
                    let text = line.strip_suffix('L').unwrap_or(&line);
                    let value = parse_int(text, at)?;
                    self.push(value);
                }
                op::LONG1 => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len, at)?;
                    self.push(long_from_le_bytes(bytes));
                }
                op::LONG4 => {
                    let len = self.read_len(at)?;
                    let bytes = self.read_bytes(len, at)?;
                    self.push(long_from_le_bytes(bytes));
                }
                op::FLOAT => {
                    let line = self.read_line()?;
                    let value = line.trim().parse::<f64>().map_err(|_| {
                        DecodeError::malformed(at, format!("invalid float literal {:?}", line))
                    })?;
                    self.push(RawValue::Float(value));
                }
                op::BINFLOAT => {
                    let value = f64::from_be_bytes(self.read_array()?);
                    self.push(RawValue::Float(value));
                }
                op::STRING => {
                    let line = self.read_line()?;
                    let value = parse_quoted(&line, at)?;
                    self.push(RawValue::Str(value));
                }
                op::BINSTRING => {
                    let len = self.read_len(at)?;
                    let bytes = self.read_bytes(len, at)?;
                    self.push(RawValue::Str(latin1(bytes)));
                }
                op::SHORT_BINSTRING => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len, at)?;
                    self.push(RawValue::Str(latin1(bytes)));
                }
                op::UNICODE => {
                    let line = self.read_line()?;
                    self.push(RawValue::Str(unescape(&line, at)?));
                }
                op::BINUNICODE => {
                    let len = self.read_len(at)?;
                    let bytes = self.read_bytes(len, at)?;
                    let text = std::str::from_utf8(bytes).map_err(|e| {
                        DecodeError::malformed(at, format!("invalid UTF-8 in string: {}", e))
                    })?;
                    self.push(RawValue::Str(text.to_string()));
                }
                op::EMPTY_DICT => {
                    self.push_shaped(RawValue::Dict(BTreeMap::new()), Shape::EMPTY);
                    self.fresh = true;
                }
                op::EMPTY_LIST => {
                    self.push_shaped(RawValue::List(Vec::new()), Shape::EMPTY);
                    self.fresh = true;
                }
                op::EMPTY_TUPLE => self.push_shaped(RawValue::Tuple(Vec::new()), Shape::EMPTY),
                op::TUPLE => {
                    let (items, shape) = self.pop_to_mark(at)?;
                    self.push_shaped(RawValue::Tuple(items), shape);
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let n = usize::from(opcode - op::TUPLE1) + 1;
                    let mut items = Vec::with_capacity(n);
                    let mut shape = Shape::EMPTY;
                    for _ in 0..n {
                        let (item, item_shape) = self.pop(at)?;
                        shape = shape.holding(item_shape).check(at)?;
                        items.push(item);
                    }
                    items.reverse();
                    self.push_shaped(RawValue::Tuple(items), shape);
                }
                op::LIST => {
                    let (items, shape) = self.pop_to_mark(at)?;
                    self.push_shaped(RawValue::List(items), shape);
                }
                op::DICT => {
                    let (items, shape) = self.pop_to_mark(at)?;
                    let mut map = BTreeMap::new();
                    insert_pairs(&mut map, items, at)?;
                    self.push_shaped(RawValue::Dict(map), shape);
                }
                op::APPEND => {
                    let (item, item_shape) = self.pop(at)?;
                    let (top, top_shape) = self.top_mut(at)?;
                    let grown = top_shape.holding(item_shape).check(at)?;
                    match top {
                        RawValue::List(list) => list.push(item),
                        other => {
                            return Err(DecodeError::malformed(
                                at,
                                format!("APPEND expected list, got {}", other.type_name()),
                            ))
                        }
                    }
                    *top_shape = grown;
                }
                op::APPENDS => {
                    let (items, shapes) = self.pop_items_to_mark(at)?;
                    let (top, top_shape) = self.top_mut(at)?;
                    let grown = top_shape.holding_all(&shapes).check(at)?;
                    match top {
                        RawValue::List(list) => list.extend(items),
                        other => {
                            return Err(DecodeError::malformed(
                                at,
                                format!("APPENDS expected list, got {}", other.type_name()),
                            ))
                        }
                    }
                    *top_shape = grown;
                }
                op::SETITEM => {
                    let (value, value_shape) = self.pop(at)?;
                    let (key, key_shape) = self.pop(at)?;
                    let (top, top_shape) = self.top_mut(at)?;
                    let grown = top_shape.holding(key_shape).holding(value_shape).check(at)?;
                    match top {
                        RawValue::Dict(map) => insert_pairs(map, vec![key, value], at)?,
                        other => {
                            return Err(DecodeError::malformed(
                                at,
                                format!("SETITEM expected dict, got {}", other.type_name()),
                            ))
                        }
                    }
                    *top_shape = grown;
                }
                op::SETITEMS => {
                    let (items, shapes) = self.pop_items_to_mark(at)?;
                    let (top, top_shape) = self.top_mut(at)?;
                    let grown = top_shape.holding_all(&shapes).check(at)?;
                    match top {
                        RawValue::Dict(map) => insert_pairs(map, items, at)?,
                        other => {
                            return Err(DecodeError::malformed(
                                at,
                                format!("SETITEMS expected dict, got {}", other.type_name()),
                            ))
                        }
                    }
                    *top_shape = grown;
                }
                op::POP => {
                    if let Some(Slot::Mark) = self.stack.last() {
                        self.stack.pop();
                    } else {
                        self.pop(at)?;
                    }
                }
                op::POP_MARK => {
                    self.pop_items_to_mark(at)?;
                }
                op::DUP => {
                    let shape = *self.top_mut(at)?.1;
                    self.charge_copy(shape, at)?;
                    let top = self.top_mut(at)?.0.clone();
                    self.push_shaped(top, shape);
                }
                op::PUT => {
                    let line = self.read_line()?;
                    let key = line.trim().parse::<u32>().map_err(|_| {
                        DecodeError::malformed(at, format!("invalid memo key {:?}", line))
                    })?;
                    self.memo_put(key, at)?;
                }
                op::BINPUT => {
                    let key = u32::from(self.read_u8()?);
                    self.memo_put(key, at)?;
                }
                op::LONG_BINPUT => {
                    let key = u32::from_le_bytes(self.read_array()?);
                    self.memo_put(key, at)?;
                }
                op::GET => {
                    let line = self.read_line()?;
                    let key = line.trim().parse::<u32>().map_err(|_| {
                        DecodeError::malformed(at, format!("invalid memo key {:?}", line))
                    })?;
                    self.memo_get(key, at)?;
                }
                op::BINGET => {
                    let key = u32::from(self.read_u8()?);
                    self.memo_get(key, at)?;
                }
                op::LONG_BINGET => {
                    let key = u32::from_le_bytes(self.read_array()?);
                    self.memo_get(key, at)?;
                }
                op::GLOBAL => {
                    let module = self.read_line()?;
                    let name = self.read_line()?;
                    debug!("unsupported global {}.{} in stream", module, name);
                    self.push(RawValue::None);
                }
                other => {
                    return Err(DecodeError::malformed(
                        at,
                        format!("invalid opcode 0x{:02x}", other),
                    ))
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Byte access
    // ------------------------------------------------------------------------

    fn read_u8(&mut self) -> DecodeResult<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| DecodeError::eof(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let at = self.pos;
        let bytes = self.read_bytes(N, at)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_bytes(&mut self, len: usize, at: usize) -> DecodeResult<&'a [u8]> {
        let remaining = self.data.len() - self.pos;
        if len > remaining {
            return Err(DecodeError::malformed(
                at,
                format!("length {} exceeds remaining {} bytes", len, remaining),
            ));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Read a signed 4-byte length field.
    fn read_len(&mut self, at: usize) -> DecodeResult<usize> {
        let len = i32::from_le_bytes(self.read_array()?);
        usize::try_from(len)
            .map_err(|_| DecodeError::malformed(at, format!("negative length {}", len)))
    }

    /// Read a newline-terminated line, dropping the terminator (and a `\r`).
    fn read_line(&mut self) -> DecodeResult<String> {
        let start = self.pos;
        let rest = &self.data[start..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| DecodeError::eof(self.data.len()))?;
        self.pos = start + end + 1;
        let line = rest[..end].strip_suffix(b"\r").unwrap_or(&rest[..end]);
        Ok(latin1(line))
    }

    // ------------------------------------------------------------------------
    // Stack access
    // ------------------------------------------------------------------------

    fn push(&mut self, value: RawValue) {
        self.stack.push(Slot::Value(value, Shape::SCALAR));
    }

    /// Push a value whose shape has already been checked.
    fn push_shaped(&mut self, value: RawValue, shape: Shape) {
        self.stack.push(Slot::Value(value, shape));
    }

    fn pop(&mut self, at: usize) -> DecodeResult<(RawValue, Shape)> {
        match self.stack.pop() {
            Some(Slot::Value(value, shape)) => {
                self.settle_memo(self.stack.len(), &value, shape, at)?;
                Ok((value, shape))
            }
            Some(Slot::Mark) => Err(DecodeError::malformed(at, "unexpected mark on stack")),
            None => Err(DecodeError::malformed(at, "stack underflow")),
        }
    }

    fn top_mut(&mut self, at: usize) -> DecodeResult<(&mut RawValue, &mut Shape)> {
        match self.stack.last_mut() {
            Some(Slot::Value(value, shape)) => Ok((value, shape)),
            Some(Slot::Mark) => Err(DecodeError::malformed(at, "unexpected mark on stack")),
            None => Err(DecodeError::malformed(at, "stack underflow")),
        }
    }

    /// Pop everything above the topmost mark, and the mark itself, as the
    /// items of a new container.
    fn pop_to_mark(&mut self, at: usize) -> DecodeResult<(Vec<RawValue>, Shape)> {
        let (items, shapes) = self.pop_items_to_mark(at)?;
        let shape = Shape::EMPTY.holding_all(&shapes).check(at)?;
        Ok((items, shape))
    }

    fn pop_items_to_mark(&mut self, at: usize) -> DecodeResult<(Vec<RawValue>, Vec<Shape>)> {
        let mark = self
            .stack
            .iter()
            .rposition(|slot| matches!(slot, Slot::Mark))
            .ok_or_else(|| DecodeError::malformed(at, "mark not found"))?;
        let drained: Vec<Slot> = self.stack.drain(mark..).collect();
        let mut items = Vec::with_capacity(drained.len().saturating_sub(1));
        let mut shapes = Vec::with_capacity(drained.len().saturating_sub(1));
        for (offset, slot) in drained.into_iter().enumerate().skip(1) {
            if let Slot::Value(value, shape) = slot {
                self.settle_memo(mark + offset, &value, shape, at)?;
                items.push(value);
                shapes.push(shape);
            }
        }
        Ok((items, shapes))
    }

    // ------------------------------------------------------------------------
    // Memo
    // ------------------------------------------------------------------------

    /// Count `shape.nodes` against the copy limit of the current load.
    fn charge_copy(&mut self, shape: Shape, at: usize) -> DecodeResult<()> {
        self.copied = self.copied.saturating_add(shape.nodes);
        if self.copied > self.copy_limit {
            return Err(DecodeError::malformed(
                at,
                format!("memo references expand beyond {} nodes", self.copy_limit),
            ));
        }
        Ok(())
    }

    fn memo_put(&mut self, key: u32, at: usize) -> DecodeResult<()> {
        let index = self.stack.len().checked_sub(1);
        let entry = match index.and_then(|i| self.stack.get(i).map(|slot| (i, slot))) {
            Some((i, Slot::Value(value, _))) if value.is_container() => MemoEntry::OnStack(i),
            Some((_, Slot::Value(value, shape))) => MemoEntry::Value(value.clone(), *shape),
            _ => return Err(DecodeError::malformed(at, "memo put without a value")),
        };
        self.memo.insert(key, entry);
        Ok(())
    }

    fn memo_get(&mut self, key: u32, at: usize) -> DecodeResult<()> {
        let shape = match self.memo.get(&key) {
            Some(MemoEntry::Value(_, shape)) => *shape,
            Some(MemoEntry::OnStack(index)) => match self.stack.get(*index) {
                Some(Slot::Value(_, shape)) => *shape,
                _ => return Err(DecodeError::malformed(at, "stale memo entry")),
            },
            None => {
                return Err(DecodeError::malformed(
                    at,
                    format!("memo key {} not found", key),
                ))
            }
        };
        self.charge_copy(shape, at)?;
        let value = match self.memo.get(&key) {
            Some(MemoEntry::Value(value, _)) => value.clone(),
            Some(MemoEntry::OnStack(index)) => match self.stack.get(*index) {
                Some(Slot::Value(value, _)) => value.clone(),
                _ => return Err(DecodeError::malformed(at, "stale memo entry")),
            },
            None => return Err(DecodeError::malformed(at, "stale memo entry")),
        };
        self.push_shaped(value, shape);
        Ok(())
    }

    /// Snapshot memo entries that pointed at the stack slot being vacated.
    fn settle_memo(
        &mut self,
        index: usize,
        value: &RawValue,
        shape: Shape,
        at: usize,
    ) -> DecodeResult<()> {
        if !value.is_container() {
            return Ok(());
        }
        let pointing = self
            .memo
            .values()
            .filter(|entry| matches!(entry, MemoEntry::OnStack(i) if *i == index))
            .count();
        for _ in 0..pointing {
            self.charge_copy(shape, at)?;
        }
        for entry in self.memo.values_mut() {
            if matches!(entry, MemoEntry::OnStack(i) if *i == index) {
                *entry = MemoEntry::Value(value.clone(), shape);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Salvage
    // ------------------------------------------------------------------------

    /// Rebuild the completed prefix of the value under construction.
    fn salvage(self, keep_open: usize) -> Option<RawValue> {
        if keep_open == 0 {
            return None;
        }
        let slots = self.stack;
        let fresh = self.fresh;
        let last = slots.len().checked_sub(1)?;

        // A single value with only the STOP missing.
        if slots.len() == 1 {
            return match &slots[0] {
                Slot::Value(value, _) => Some(value.clone()),
                Slot::Mark => None,
            };
        }

        struct Frame {
            container: RawValue,
            pending: Vec<RawValue>,
        }

        let marked = |i: usize| matches!(slots.get(i + 1), Some(Slot::Mark));
        // The root is always the value under construction, even when it is
        // being filled one SETITEM at a time.
        let opens_at = |i: usize, value: &RawValue| {
            value.is_container() && (i == 0 || marked(i) || (i == last && fresh))
        };

        let mut frames: Vec<Frame> = Vec::new();
        let mut i = 0;
        while i < slots.len() {
            match &slots[i] {
                Slot::Value(value, _) if opens_at(i, value) => {
                    frames.push(Frame {
                        container: value.clone(),
                        pending: Vec::new(),
                    });
                    i += if marked(i) { 2 } else { 1 };
                }
                Slot::Value(..) if frames.is_empty() => return None,
                Slot::Value(value, _) => {
                    if let Some(frame) = frames.last_mut() {
                        frame.pending.push(value.clone());
                    }
                    i += 1;
                }
                // A mark with no container below it opens a value that only
                // exists once its closing opcode runs; nothing past it is usable.
                Slot::Mark => break,
            }
        }

        let mut child: Option<RawValue> = None;
        for (depth, mut frame) in frames.into_iter().enumerate().rev() {
            if depth >= keep_open {
                continue;
            }
            if let Some(inner) = child.take() {
                frame.pending.push(inner);
            }
            match &mut frame.container {
                RawValue::Dict(map) => {
                    let mut items = frame.pending.into_iter();
                    while let (Some(key), Some(value)) = (items.next(), items.next()) {
                        match key {
                            RawValue::Str(key) => {
                                map.insert(key, value);
                            }
                            _ => break,
                        }
                    }
                }
                RawValue::List(list) => list.extend(frame.pending),
                _ => {}
            }
            child = Some(frame.container);
        }
        child
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn insert_pairs(
    map: &mut BTreeMap<String, RawValue>,
    items: Vec<RawValue>,
    at: usize,
) -> DecodeResult<()> {
    if items.len() % 2 != 0 {
        return Err(DecodeError::malformed(at, "odd number of items for dict"));
    }
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        match key {
            RawValue::Str(key) => {
                map.insert(key, value);
            }
            other => {
                return Err(DecodeError::malformed(
                    at,
                    format!("mapping key must be a string, got {}", other.type_name()),
                ))
            }
        }
    }
    Ok(())
}

fn parse_int(text: &str, at: usize) -> DecodeResult<RawValue> {
    let text = text.trim();
    if let Ok(value) = text.parse::<i64>() {
        return Ok(RawValue::Int(value));
    }
    let digits = text.strip_prefix('-').unwrap_or(text);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(RawValue::BigInt(text.to_string()));
    }
    Err(DecodeError::malformed(
        at,
        format!("invalid integer literal {:?}", text),
    ))
}

/// Decode a little-endian two's complement integer of any width.
fn long_from_le_bytes(bytes: &[u8]) -> RawValue {
    if bytes.is_empty() {
        return RawValue::Int(0);
    }
    let negative = bytes[bytes.len() - 1] & 0x80 != 0;
    if bytes.len() <= 8 {
        let mut buf = if negative { [0xffu8; 8] } else { [0u8; 8] };
        buf[..bytes.len()].copy_from_slice(bytes);
        return RawValue::Int(i64::from_le_bytes(buf));
    }

    // Magnitude as big-endian bytes.
    let mut magnitude: Vec<u8> = bytes.iter().rev().copied().collect();
    if negative {
        for byte in magnitude.iter_mut() {
            *byte = !*byte;
        }
        for byte in magnitude.iter_mut().rev() {
            let (sum, overflow) = byte.overflowing_add(1);
            *byte = sum;
            if !overflow {
                break;
            }
        }
    }

    let mut digits = Vec::new();
    while magnitude.iter().any(|&b| b != 0) {
        let mut remainder = 0u32;
        for byte in magnitude.iter_mut() {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = (acc / 10) as u8;
            remainder = acc % 10;
        }
        digits.push(b'0' + remainder as u8);
    }
    if digits.is_empty() {
        digits.push(b'0');
    }
    if negative {
        digits.push(b'-');
    }
    digits.reverse();
    RawValue::BigInt(String::from_utf8_lossy(&digits).into_owned())
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Parse a protocol-0 `STRING` argument: a quoted Python literal.
fn parse_quoted(repr: &str, at: usize) -> DecodeResult<String> {
    let bytes = repr.as_bytes();
    let quoted = bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0];
    if !quoted {
        return Err(DecodeError::malformed(
            at,
            format!("STRING argument is not quoted: {:?}", repr),
        ));
    }
    unescape(&repr[1..repr.len() - 1], at)
}

/// Undo Python backslash escapes as written by protocol-0 string opcodes.
fn unescape(text: &str, at: usize) -> DecodeResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(escape) = chars.next() else {
            out.push('\\');
            break;
        };
        match escape {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '0'..='7' => {
                let mut code = escape.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'x' | 'u' | 'U' => {
                let width = match escape {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = chars.by_ref().take(width).collect();
                let code = u32::from_str_radix(&hex, 16).map_err(|_| {
                    DecodeError::malformed(at, format!("invalid \\{} escape {:?}", escape, hex))
                })?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(entries: &[(&str, RawValue)]) -> RawValue {
        RawValue::dict(entries.iter().cloned())
    }

    // ========================================================================
    // Basic Opcodes
    // ========================================================================

    #[test]
    fn test_decode_protocol2_dict() {
        // pickle.dumps({'a': 1, 'b': 'x'}, 2)
        let bytes = b"\x80\x02}q\x00(X\x01\x00\x00\x00aq\x01K\x01X\x01\x00\x00\x00bq\x02X\x01\x00\x00\x00xq\x03u.";
        let value = decode(bytes).unwrap();
        assert_eq!(
            value,
            dict(&[("a", RawValue::Int(1)), ("b", RawValue::from("x"))])
        );
    }

    #[test]
    fn test_decode_protocol0_list_and_tuple() {
        // pickle.dumps([1, (2, 'x')], 0) with text opcodes
        let bytes = b"(lp0\nI1\na(I2\nS'x'\np1\ntp2\na.";
        let value = decode(bytes).unwrap();
        assert_eq!(
            value,
            RawValue::list([
                RawValue::Int(1),
                RawValue::tuple([RawValue::Int(2), RawValue::from("x")]),
            ])
        );
    }

    #[test]
    fn test_decode_text_bools_and_long() {
        let bytes = b"(I01\nI00\nL123456789012345678901234567890L\nt.";
        let value = decode(bytes).unwrap();
        assert_eq!(
            value,
            RawValue::tuple([
                RawValue::Bool(true),
                RawValue::Bool(false),
                RawValue::BigInt("123456789012345678901234567890".to_string()),
            ])
        );
    }

    #[test]
    fn test_decode_long1_negative() {
        // LONG1 with 2 bytes: -256 == 0x00 0xff
        let bytes = b"\x8a\x02\x00\xff.";
        assert_eq!(decode(bytes).unwrap(), RawValue::Int(-256));
    }

    #[test]
    fn test_decode_long1_wide() {
        // 2**64 as LONG1: 9 bytes, little-endian
        let bytes = b"\x8a\x09\x00\x00\x00\x00\x00\x00\x00\x00\x01.";
        assert_eq!(
            decode(bytes).unwrap(),
            RawValue::BigInt("18446744073709551616".to_string())
        );
    }

    #[test]
    fn test_decode_binfloat_big_endian() {
        let mut bytes = vec![op::BINFLOAT];
        bytes.extend_from_slice(&1.5f64.to_be_bytes());
        bytes.push(op::STOP);
        assert_eq!(decode(&bytes).unwrap(), RawValue::Float(1.5));
    }

    #[test]
    fn test_decode_legacy_string_is_latin1() {
        let bytes = b"U\x02\xe9t.";
        assert_eq!(decode(bytes).unwrap(), RawValue::from("\u{e9}t"));
    }

    #[test]
    fn test_decode_unicode_escapes() {
        let bytes = b"Vcaf\\u00e9\n.";
        assert_eq!(decode(bytes).unwrap(), RawValue::from("caf\u{e9}"));
    }

    #[test]
    fn test_decode_global_pushes_none() {
        let bytes = b"c__builtin__\nobject\n.";
        assert_eq!(decode(bytes).unwrap(), RawValue::None);
    }

    #[test]
    fn test_successive_loads_advance_position() {
        let bytes = b"K\x01.K\x02.";
        let mut unpickler = Unpickler::new(bytes);
        assert_eq!(unpickler.load().unwrap(), RawValue::Int(1));
        assert_eq!(unpickler.position(), 3);
        assert_eq!(unpickler.load().unwrap(), RawValue::Int(2));
        assert_eq!(unpickler.position(), bytes.len());
    }

    // ========================================================================
    // Memo
    // ========================================================================

    #[test]
    fn test_memo_get_sees_filled_container() {
        // x = {'k': 1}; pickle.dumps([x, x], 2)
        let bytes = b"\x80\x02]q\x00(}q\x01X\x01\x00\x00\x00kq\x02K\x01sh\x01e.";
        let value = decode(bytes).unwrap();
        let inner = dict(&[("k", RawValue::Int(1))]);
        assert_eq!(value, RawValue::list([inner.clone(), inner]));
    }

    #[test]
    fn test_memo_missing_key_is_malformed() {
        let err = decode(b"h\x05.").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedStream { .. }));
    }

    // ========================================================================
    // Errors
    // ========================================================================

    #[test]
    fn test_unsupported_protocol() {
        let err = decode(b"\x80\x04K\x01.").unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedVersion { protocol: 4 });
    }

    #[test]
    fn test_unknown_opcode() {
        let err = decode(b"\xff").unwrap_err();
        assert!(err.to_string().contains("invalid opcode"));
    }

    #[test]
    fn test_truncated_stream() {
        let err = decode(b"\x80\x02}q\x00(X\x01\x00").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedStream { .. }));
    }

    #[test]
    fn test_length_exceeds_remaining() {
        let err = decode(b"X\xff\x00\x00\x00abc").unwrap_err();
        assert!(err.to_string().contains("exceeds remaining"));
    }

    #[test]
    fn test_non_string_key_rejected() {
        let err = decode(b"}K\x01K\x02s.").unwrap_err();
        assert!(err.to_string().contains("mapping key must be a string"));
    }

    // ========================================================================
    // Limits
    // ========================================================================

    /// `depth` empty lists, each appended into the one below it.
    fn nested_lists(depth: usize) -> Vec<u8> {
        let mut bytes = vec![op::EMPTY_LIST; depth];
        bytes.resize(2 * depth - 1, op::APPEND);
        bytes.push(op::STOP);
        bytes
    }

    /// Each level is a list holding two memo copies of the level below.
    fn doubling_lists(levels: u8) -> Vec<u8> {
        let mut bytes = vec![op::EMPTY_LIST, op::BINPUT, 0];
        for level in 1..=levels {
            let below = level - 1;
            bytes.extend([op::MARK, op::BINGET, below, op::BINGET, below, op::LIST]);
            bytes.extend([op::BINPUT, level]);
        }
        bytes.push(op::STOP);
        bytes
    }

    #[test]
    fn test_nesting_at_limit_decodes() {
        let value = decode(&nested_lists(MAX_DEPTH)).unwrap();
        let mut depth = 0;
        let mut current = &value;
        while let Some(items) = current.as_sequence() {
            depth += 1;
            match items.first() {
                Some(inner) => current = inner,
                None => break,
            }
        }
        assert_eq!(depth, MAX_DEPTH);
    }

    #[test]
    fn test_nesting_past_limit_is_malformed() {
        let err = decode(&nested_lists(MAX_DEPTH + 1)).unwrap_err();
        assert!(err.to_string().contains("nesting deeper than"));
    }

    #[test]
    fn test_very_deep_stream_salvages_without_overflow() {
        let partial = decode_prefix(&nested_lists(200_000), 2);
        assert!(!partial.is_complete());
        assert!(partial.value.is_some());
    }

    #[test]
    fn test_memo_expansion_is_bounded() {
        let bytes = doubling_lists(40);
        let err = Unpickler::new(&bytes).with_copy_limit(10_000).load().unwrap_err();
        assert!(err.to_string().contains("memo references expand beyond 10000 nodes"));
    }

    #[test]
    fn test_small_memo_expansion_within_limit() {
        let value = decode(&doubling_lists(3)).unwrap();
        let level1 = RawValue::list([RawValue::list([]), RawValue::list([])]);
        let level2 = RawValue::list([level1.clone(), level1]);
        assert_eq!(value, RawValue::list([level2.clone(), level2]));
    }

    // ========================================================================
    // Salvage
    // ========================================================================

    #[test]
    fn test_prefix_keeps_completed_entries() {
        // {'a': 1, 'b': {'c': <truncated>
        let bytes = b"}(X\x01\x00\x00\x00aK\x01X\x01\x00\x00\x00b}(X\x01\x00\x00\x00cK";
        let partial = decode_prefix(bytes, 1);
        assert!(!partial.is_complete());
        assert_eq!(partial.value, Some(dict(&[("a", RawValue::Int(1))])));
    }

    #[test]
    fn test_prefix_keep_two_levels() {
        let bytes = b"}(X\x01\x00\x00\x00aK\x01X\x01\x00\x00\x00b}(X\x01\x00\x00\x00cK\x02X\x01\x00\x00\x00d";
        let partial = decode_prefix(bytes, 2);
        assert_eq!(
            partial.value,
            Some(dict(&[
                ("a", RawValue::Int(1)),
                ("b", dict(&[("c", RawValue::Int(2))])),
            ]))
        );
    }

    #[test]
    fn test_prefix_drops_fresh_container() {
        // {'a': 1, 'b': {}   -- the inner dict was just created
        let bytes = b"}(X\x01\x00\x00\x00aK\x01X\x01\x00\x00\x00b}";
        let partial = decode_prefix(bytes, 1);
        assert_eq!(partial.value, Some(dict(&[("a", RawValue::Int(1))])));
    }

    #[test]
    fn test_prefix_zero_keeps_nothing() {
        let partial = decode_prefix(b"}(X\x01\x00\x00\x00aK\x01", 0);
        assert_eq!(partial.value, None);
        assert!(partial.error.is_some());
    }
}
