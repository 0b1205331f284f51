//! The code block: item stream, primitive emitters, labels, deferred items,
//! and the relaxation fix-point.
//!
//! An instruction encoder drives a [`CodeBlock`] through emit/label/deferred
//! calls; [`CodeBlock::assemble`] then resolves every label position and
//! selects a final encoding for every deferred item by iterating a
//! deferred-sizing pass and a label-positioning pass until nothing changes.
//! Convergence is guaranteed because a deferred item's selected alternative
//! only ever moves forward (monotonic growth) and the last alternative must
//! always accept.

use alloc::boxed::Box;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::mem;

use crate::addr::Endian;
use crate::error::AsmError;
use crate::linker::{ProvidedLink, RequiredLink};
use crate::listing;

/// A deferred-item check. `Ok(Some(n))` accepts the alternative with a size
/// of `n` bytes at position `pos`; `Ok(None)` rejects it so the next
/// alternative is tried; `Err` aborts assembly.
///
/// The block reference exposes label state ([`CodeBlock::label_pos`]),
/// start position, and endianness; the item stream itself is detached
/// while the closure runs and is not observable.
pub type DeferredCheck = Box<dyn Fn(&CodeBlock, u64) -> Result<Option<usize>, AsmError>>;

/// A deferred-item produce. Appends the alternative's encoding for position
/// `pos`; it must append exactly the byte count its check returned.
pub type DeferredProduce = Box<dyn Fn(&CodeBlock, u64, &mut Vec<u8>)>;

/// Handle to a label in a block's label arena.
///
/// Handles are only meaningful for the block that created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub(crate) usize);

#[derive(Debug, Clone)]
struct LabelState {
    name: String,
    /// Byte position; provisional during relaxation, final afterwards.
    pos: Option<u64>,
    /// Whether the label has been placed into the item stream.
    placed: bool,
}

/// A size-relaxable stream item carrying ordered `(check, produce)`
/// encoding alternatives.
pub struct Deferred {
    checks: Vec<DeferredCheck>,
    produces: Vec<DeferredProduce>,
    /// Selected alternative; never decreases across relaxation passes.
    current: usize,
    /// Byte size of the selected alternative.
    size: usize,
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("alternatives", &self.checks.len())
            .field("current", &self.current)
            .field("size", &self.size)
            .finish()
    }
}

/// One element of the code-block stream.
#[derive(Debug)]
pub enum Item {
    /// A plain emitted byte.
    Byte(u8),
    /// A label anchor; contributes zero bytes.
    Label(LabelId),
    /// A deferred item; its size is chosen by relaxation.
    Deferred(Deferred),
    /// A text annotation for listing output; contributes zero bytes.
    Listing(String),
}

/// Spine of the item stream used during relaxation: only labels and
/// deferred items, with the plain-byte gap since the previous entry.
struct Fixup {
    /// Plain bytes between the previous fixup item and this one.
    span: u64,
    /// Index of the label or deferred item in the stream.
    index: usize,
}

/// An in-progress assembly unit: an ordered item stream plus start
/// position, endianness, and required/provided link sites.
///
/// # Examples
///
/// ```
/// use jitblock::CodeBlock;
///
/// let mut block = CodeBlock::new();
/// block.gen8(0x90).gen8(0xC3);
/// assert_eq!(block.assemble().unwrap(), 2);
/// assert_eq!(block.bytes(), vec![0x90, 0xC3]);
/// ```
pub struct CodeBlock {
    start_pos: u64,
    endian: Endian,
    use_listing: bool,
    items: Vec<Item>,
    labels: Vec<LabelState>,
    label_seq: u64,
    required: Vec<(LabelId, Rc<dyn RequiredLink>)>,
    provided: Vec<(LabelId, Rc<dyn ProvidedLink>)>,
}

impl fmt::Debug for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeBlock")
            .field("start_pos", &self.start_pos)
            .field("endian", &self.endian)
            .field("items", &self.items.len())
            .field("labels", &self.labels.len())
            .field("required", &self.required.len())
            .field("provided", &self.provided.len())
            .finish()
    }
}

impl Default for CodeBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeBlock {
    /// Create an empty block at start position 0, little-endian, with
    /// listing collection disabled.
    pub fn new() -> Self {
        Self {
            start_pos: 0,
            endian: Endian::Little,
            use_listing: false,
            items: Vec::new(),
            labels: Vec::new(),
            label_seq: 0,
            required: Vec::new(),
            provided: Vec::new(),
        }
    }

    /// Set the byte offset used as the block's base position.
    pub fn set_start_pos(&mut self, pos: u64) {
        self.start_pos = pos;
    }

    /// The block's base position.
    pub fn start_pos(&self) -> u64 {
        self.start_pos
    }

    /// Set the byte order for multi-byte emission.
    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// The byte order used for multi-byte emission.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Enable or disable listing collection. When disabled (the default),
    /// [`CodeBlock::gen_listing`] is a no-op.
    pub fn set_listing(&mut self, enabled: bool) {
        self.use_listing = enabled;
    }

    pub(crate) fn items(&self) -> &[Item] {
        &self.items
    }

    // ── primitive emission ─────────────────────────────────

    /// Append one byte (`n & 0xff`).
    pub fn gen8(&mut self, n: i64) -> &mut Self {
        self.items.push(Item::Byte(n as u8));
        self
    }

    /// Append a 16-bit value in the block's byte order.
    pub fn gen16(&mut self, n: i64) -> &mut Self {
        self.gen_int(2, n)
    }

    /// Append a 32-bit value in the block's byte order. Negative inputs are
    /// emitted as their two's-complement bit pattern.
    pub fn gen32(&mut self, n: i64) -> &mut Self {
        self.gen_int(4, n)
    }

    /// Append a 64-bit value in the block's byte order.
    pub fn gen64(&mut self, n: i64) -> &mut Self {
        self.gen_int(8, n)
    }

    fn gen_int(&mut self, bytes: u32, n: i64) -> &mut Self {
        match self.endian {
            Endian::Little => {
                for k in 0..bytes {
                    self.items.push(Item::Byte((n >> (8 * k)) as u8));
                }
            }
            Endian::Big => {
                for k in (0..bytes).rev() {
                    self.items.push(Item::Byte((n >> (8 * k)) as u8));
                }
            }
        }
        self
    }

    /// Append a value of the given width in bits.
    ///
    /// # Errors
    ///
    /// [`AsmError::InvalidWidth`] for widths other than 8, 16, 32 or 64.
    pub fn gen_number(&mut self, width: u32, n: i64) -> Result<&mut Self, AsmError> {
        match width {
            8 => Ok(self.gen8(n)),
            16 => Ok(self.gen16(n)),
            32 => Ok(self.gen32(n)),
            64 => Ok(self.gen64(n)),
            _ => Err(AsmError::InvalidWidth { width }),
        }
    }

    /// Append a listing annotation. Contributes zero bytes and is ignored
    /// unless listing collection is enabled.
    pub fn gen_listing(&mut self, text: impl Into<String>) -> &mut Self {
        if self.use_listing {
            self.items.push(Item::Listing(text.into()));
        }
        self
    }

    // ── labels ─────────────────────────────────────────────

    /// Create a fresh, unplaced label with an auto-generated name
    /// (`L0`, `L1`, …). The counter is per block, so listings are
    /// reproducible across blocks.
    pub fn label(&mut self) -> LabelId {
        let name = format!("L{}", self.label_seq);
        self.label_seq += 1;
        self.push_label(name)
    }

    /// Create a fresh, unplaced label with an explicit name.
    pub fn label_named(&mut self, name: impl Into<String>) -> LabelId {
        self.push_label(name.into())
    }

    /// Create a fresh, unplaced label from a numeric id (rendered `_<id>`).
    pub fn label_numbered(&mut self, id: u64) -> LabelId {
        self.push_label(format!("_{}", id))
    }

    fn push_label(&mut self, name: String) -> LabelId {
        self.labels.push(LabelState {
            name,
            pos: None,
            placed: false,
        });
        LabelId(self.labels.len() - 1)
    }

    /// Place a label at the current stream tail.
    ///
    /// # Errors
    ///
    /// [`AsmError::DuplicateLabel`] if the label was already placed;
    /// [`AsmError::Usage`] for a handle from another block.
    pub fn gen_label(&mut self, label: LabelId) -> Result<&mut Self, AsmError> {
        let state = self.labels.get_mut(label.0).ok_or_else(|| AsmError::Usage {
            msg: format!("unknown label id {}", label.0),
        })?;
        if state.placed {
            return Err(AsmError::DuplicateLabel {
                label: state.name.clone(),
            });
        }
        state.placed = true;
        self.items.push(Item::Label(label));
        Ok(self)
    }

    /// The label's byte position, once assigned by [`CodeBlock::assemble`].
    pub fn label_pos(&self, label: LabelId) -> Option<u64> {
        self.labels.get(label.0).and_then(|state| state.pos)
    }

    /// The label's display name.
    pub fn label_name(&self, label: LabelId) -> Option<&str> {
        self.labels.get(label.0).map(|state| state.name.as_str())
    }

    // ── deferred items ─────────────────────────────────────

    /// Append a deferred item with ordered `(check, produce)` encoding
    /// alternatives. Alternatives should appear in increasing order of
    /// size/generality; the last one must always accept.
    ///
    /// # Errors
    ///
    /// [`AsmError::Usage`] when the alternative lists are empty or of
    /// different lengths.
    pub fn gen_deferred(
        &mut self,
        checks: Vec<DeferredCheck>,
        produces: Vec<DeferredProduce>,
    ) -> Result<&mut Self, AsmError> {
        if checks.is_empty() || checks.len() != produces.len() {
            return Err(AsmError::Usage {
                msg: format!(
                    "deferred item needs matching non-empty alternatives ({} checks, {} produces)",
                    checks.len(),
                    produces.len()
                ),
            });
        }
        self.items.push(Item::Deferred(Deferred {
            checks,
            produces,
            current: 0,
            size: 0,
        }));
        Ok(self)
    }

    /// Pad with `fill` bytes to the next position `p` with
    /// `p ≡ offset (mod multiple)`.
    ///
    /// # Errors
    ///
    /// [`AsmError::Usage`] when `multiple` is zero.
    pub fn align(&mut self, multiple: u64, offset: u64, fill: u8) -> Result<&mut Self, AsmError> {
        if multiple == 0 {
            return Err(AsmError::Usage {
                msg: String::from("align multiple must be nonzero"),
            });
        }
        let pad_at = move |pos: u64| ((offset % multiple) + multiple - (pos % multiple)) % multiple;
        let check: DeferredCheck = Box::new(move |_, pos| Ok(Some(pad_at(pos) as usize)));
        let produce: DeferredProduce = Box::new(move |_, pos, out| {
            out.resize(out.len() + pad_at(pos) as usize, fill);
        });
        self.gen_deferred(Vec::from([check]), Vec::from([produce]))
    }

    /// Pad with `fill` bytes until the current position equals `address`.
    ///
    /// A target behind the current position surfaces as
    /// [`AsmError::OriginBackwards`] during assembly.
    pub fn origin(&mut self, address: u64, fill: u8) -> Result<&mut Self, AsmError> {
        let check: DeferredCheck = Box::new(move |_, pos| {
            if address < pos {
                return Err(AsmError::OriginBackwards {
                    target: address,
                    pos,
                });
            }
            Ok(Some((address - pos) as usize))
        });
        let produce: DeferredProduce = Box::new(move |_, pos, out| {
            out.resize(out.len() + (address - pos) as usize, fill);
        });
        self.gen_deferred(Vec::from([check]), Vec::from([produce]))
    }

    // ── required / provided sites ──────────────────────────

    /// Register a required site: an anchor label followed by a zeroed
    /// placeholder of `width() / 8` bytes, to be patched by the linker.
    ///
    /// # Errors
    ///
    /// [`AsmError::InvalidWidth`] when the link width is zero or not a
    /// multiple of 8.
    pub fn gen_required(&mut self, link: Rc<dyn RequiredLink>) -> Result<&mut Self, AsmError> {
        let bits = link.width();
        if bits == 0 || bits % 8 != 0 {
            return Err(AsmError::InvalidWidth { width: bits });
        }
        let label = self.label();
        self.gen_label(label)?;
        for _ in 0..bits / 8 {
            self.gen8(0);
        }
        self.required.push((label, link));
        Ok(self)
    }

    /// Register a provided site: an anchor label whose host address is
    /// handed to the link object when the block is serialized to
    /// executable memory. Reserves no bytes.
    pub fn gen_provided(&mut self, link: Rc<dyn ProvidedLink>) -> Result<&mut Self, AsmError> {
        let label = self.label();
        self.gen_label(label)?;
        self.provided.push((label, link));
        Ok(self)
    }

    pub(crate) fn required_sites(&self) -> &[(LabelId, Rc<dyn RequiredLink>)] {
        &self.required
    }

    pub(crate) fn provided_sites(&self) -> &[(LabelId, Rc<dyn ProvidedLink>)] {
        &self.provided
    }

    // ── assembly ───────────────────────────────────────────

    /// Byte length of the stream under the currently selected deferred
    /// sizes. Equals the [`CodeBlock::assemble`] return value afterwards.
    pub fn byte_count(&self) -> u64 {
        self.items
            .iter()
            .map(|item| match item {
                Item::Byte(_) => 1,
                Item::Deferred(d) => d.size as u64,
                Item::Label(_) | Item::Listing(_) => 0,
            })
            .sum()
    }

    /// The final byte image. Meaningful after [`CodeBlock::assemble`], when
    /// every deferred item has been replaced by its produced bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.items
            .iter()
            .filter_map(|item| match item {
                Item::Byte(b) => Some(*b),
                _ => None,
            })
            .collect()
    }

    /// Resolve every label position and deferred alternative, then freeze
    /// the stream: deferred items are replaced by their produced bytes.
    /// Returns the final byte length. Idempotent on an assembled block.
    ///
    /// # Errors
    ///
    /// [`AsmError::UnresolvedDeferred`] when every alternative of a
    /// deferred item rejects, [`AsmError::DeferredSizeMismatch`] when a
    /// produce emits a different byte count than its check declared, any
    /// error a check alternative raises (e.g.
    /// [`AsmError::OriginBackwards`]), and [`AsmError::RelaxationLimit`] if
    /// the fix-point fails to settle within its pass bound. No partial
    /// state is promised after an error.
    pub fn assemble(&mut self) -> Result<u64, AsmError> {
        let mut items = mem::take(&mut self.items);

        // Provisional positions and the fixup spine. Deferred sizes start
        // at zero so first-pass positions are minimal.
        let mut fixups = Vec::new();
        let mut span = 0u64;
        let mut pos = self.start_pos;
        let mut deferred_count = 0usize;
        let mut label_count = 0usize;
        let mut max_alternatives = 1usize;
        for (index, item) in items.iter_mut().enumerate() {
            match item {
                Item::Byte(_) => {
                    span += 1;
                    pos += 1;
                }
                Item::Listing(_) => {}
                Item::Label(id) => {
                    self.labels[id.0].pos = Some(pos);
                    label_count += 1;
                    fixups.push(Fixup { span, index });
                    span = 0;
                }
                Item::Deferred(d) => {
                    d.current = 0;
                    d.size = 0;
                    deferred_count += 1;
                    max_alternatives = max_alternatives.max(d.checks.len());
                    fixups.push(Fixup { span, index });
                    span = 0;
                }
            }
        }

        // Each pass either settles or advances some `current` (bounded by
        // D·(A-1)) or moves a label; anything beyond that is a bug.
        let max_passes = deferred_count * (max_alternatives - 1) + label_count + 2;

        let mut passes = 0usize;
        loop {
            passes += 1;
            if passes > max_passes {
                return Err(AsmError::RelaxationLimit { max: max_passes });
            }
            let mut changed = false;

            // Deferred sizing pass: advance `current` past rejecting
            // alternatives; it never rewinds.
            let mut pos = self.start_pos;
            for fixup in &fixups {
                pos += fixup.span;
                if let Item::Deferred(d) = &mut items[fixup.index] {
                    let new_size = loop {
                        if d.current == d.checks.len() {
                            return Err(AsmError::UnresolvedDeferred { index: fixup.index });
                        }
                        match (d.checks[d.current])(self, pos)? {
                            Some(size) => break size,
                            None => d.current += 1,
                        }
                    };
                    if new_size != d.size {
                        d.size = new_size;
                        changed = true;
                    }
                    pos += d.size as u64;
                }
            }

            // Label positioning pass.
            let mut pos = self.start_pos;
            for fixup in &fixups {
                pos += fixup.span;
                match &items[fixup.index] {
                    Item::Label(id) => {
                        if self.labels[id.0].pos != Some(pos) {
                            self.labels[id.0].pos = Some(pos);
                            changed = true;
                        }
                    }
                    Item::Deferred(d) => pos += d.size as u64,
                    Item::Byte(_) | Item::Listing(_) => {}
                }
            }

            if !changed {
                break;
            }
        }

        // Final emission: freeze the stream. Labels are kept (re-assembly
        // is a no-op), deferred items become their produced bytes.
        let mut out = Vec::with_capacity(items.len());
        let mut pos = self.start_pos;
        for (index, item) in items.into_iter().enumerate() {
            match item {
                Item::Byte(b) => {
                    out.push(Item::Byte(b));
                    pos += 1;
                }
                Item::Listing(text) => out.push(Item::Listing(text)),
                Item::Label(id) => {
                    if self.labels[id.0].pos != Some(pos) {
                        return Err(AsmError::Usage {
                            msg: format!(
                                "label '{}' drifted during emission",
                                self.labels[id.0].name
                            ),
                        });
                    }
                    out.push(Item::Label(id));
                }
                Item::Deferred(d) => {
                    let mut buf = Vec::with_capacity(d.size);
                    (d.produces[d.current])(self, pos, &mut buf);
                    if buf.len() != d.size {
                        return Err(AsmError::DeferredSizeMismatch {
                            index,
                            expected: d.size,
                            actual: buf.len(),
                        });
                    }
                    pos += d.size as u64;
                    out.extend(buf.into_iter().map(Item::Byte));
                }
            }
        }
        self.items = out;
        Ok(pos - self.start_pos)
    }

    // ── listing ────────────────────────────────────────────

    /// Render the listing for positions in `[from, to)` (`to = None` means
    /// to the end). See the [`listing`](crate::listing) module for the
    /// column format.
    pub fn listing_string(&self, from: u64, to: Option<u64>) -> String {
        listing::render(self, from, to)
    }

    /// Serialize the assembled block into executable memory, assigning
    /// every provided site its host address.
    ///
    /// Calls [`CodeBlock::assemble`] first, so it may be invoked on a fresh
    /// or an already-assembled block with identical results.
    #[cfg(feature = "std")]
    pub fn assemble_to_machine_code_block(
        &mut self,
    ) -> Result<crate::exec::MachineCodeBlock, AsmError> {
        crate::exec::MachineCodeBlock::from_code_block(self)
    }
}
