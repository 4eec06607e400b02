use bitflags::bitflags;

bitflags! {
    /// Per-object flags stored in the header word.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        const IMMUTABLE = 1 << 0;
        const PINNED = 1 << 1;
    }
}

/// The one-word header at the start of every heap object.
///
/// ```text
/// [0..<22  class index]
/// [22..<24 reserved]
/// [24..<29 object format (base + extra bits)]
/// [29..<32 gc color, reserved]
/// [32..<54 identity hash]
/// [54..<56 flags]
/// [56..<64 slot count, 255 = see extended header]
/// ```
///
/// Objects with 255 or more slots carry an extended header word holding the
/// true slot count immediately before the header word.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Header(u64);

impl Header {
    pub const CLASS_INDEX_SHIFT: u64 = 0;
    pub const CLASS_INDEX_MASK: u64 = 0x3F_FFFF << Self::CLASS_INDEX_SHIFT;

    pub const FORMAT_SHIFT: u64 = 24;
    pub const FORMAT_MASK: u64 = 0x1F << Self::FORMAT_SHIFT;

    pub const GC_COLOR_SHIFT: u64 = 29;
    pub const GC_COLOR_MASK: u64 = 0b111 << Self::GC_COLOR_SHIFT;

    pub const HASH_SHIFT: u64 = 32;
    pub const HASH_MASK: u64 = 0x3F_FFFF << Self::HASH_SHIFT;

    pub const FLAGS_SHIFT: u64 = 54;
    pub const FLAGS_MASK: u64 = 0b11 << Self::FLAGS_SHIFT;

    pub const SLOT_COUNT_SHIFT: u64 = 56;
    pub const SLOT_COUNT_MASK: u64 = 0xFF << Self::SLOT_COUNT_SHIFT;

    /// Slot count value meaning "read the extended header".
    pub const OVERFLOW_SLOTS: usize = 255;
    pub const MAX_CLASS_INDEX: u32 = 0x3F_FFFF;
    pub const MAX_IDENTITY_HASH: u32 = 0x3F_FFFF;

    #[inline]
    pub fn encode(
        slot_count: u8,
        format: u8,
        class_index: u32,
        identity_hash: u32,
        flags: HeaderFlags,
    ) -> Header {
        let inner = (((class_index as u64) << Self::CLASS_INDEX_SHIFT) & Self::CLASS_INDEX_MASK)
            | (((format as u64) << Self::FORMAT_SHIFT) & Self::FORMAT_MASK)
            | (((identity_hash as u64) << Self::HASH_SHIFT) & Self::HASH_MASK)
            | (((flags.bits() as u64) << Self::FLAGS_SHIFT) & Self::FLAGS_MASK)
            | ((slot_count as u64) << Self::SLOT_COUNT_SHIFT);
        Header(inner)
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn class_index(self) -> u32 {
        ((self.0 & Self::CLASS_INDEX_MASK) >> Self::CLASS_INDEX_SHIFT) as u32
    }

    /// Raw format field, base format plus extra bits.
    #[inline]
    pub fn format(self) -> u8 {
        ((self.0 & Self::FORMAT_MASK) >> Self::FORMAT_SHIFT) as u8
    }

    #[inline]
    pub fn gc_color(self) -> u8 {
        ((self.0 & Self::GC_COLOR_MASK) >> Self::GC_COLOR_SHIFT) as u8
    }

    #[inline]
    pub fn identity_hash(self) -> u32 {
        ((self.0 & Self::HASH_MASK) >> Self::HASH_SHIFT) as u32
    }

    #[inline]
    pub fn flags(self) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(((self.0 & Self::FLAGS_MASK) >> Self::FLAGS_SHIFT) as u8)
    }

    /// Slot count as stored, saturated at [`Header::OVERFLOW_SLOTS`].
    #[inline]
    pub fn slot_count(self) -> u8 {
        ((self.0 & Self::SLOT_COUNT_MASK) >> Self::SLOT_COUNT_SHIFT) as u8
    }

    #[inline]
    pub fn has_extended_header(self) -> bool {
        self.slot_count() as usize == Self::OVERFLOW_SLOTS
    }

    #[inline]
    pub fn is_immutable(self) -> bool {
        self.flags().contains(HeaderFlags::IMMUTABLE)
    }

    #[inline]
    pub fn is_pinned(self) -> bool {
        self.flags().contains(HeaderFlags::PINNED)
    }

    #[inline]
    pub fn set_flags(&mut self, flags: HeaderFlags) -> &mut Self {
        let f = ((flags.bits() as u64) << Self::FLAGS_SHIFT) & Self::FLAGS_MASK;
        self.0 = (self.0 & !Self::FLAGS_MASK) | f;
        self
    }

    #[inline]
    pub fn set_class_index(&mut self, class_index: u32) -> &mut Self {
        let bits = ((class_index as u64) << Self::CLASS_INDEX_SHIFT) & Self::CLASS_INDEX_MASK;
        self.0 = (self.0 & !Self::CLASS_INDEX_MASK) | bits;
        self
    }

    #[inline]
    pub fn set_gc_color(&mut self, color: u8) -> &mut Self {
        let bits = ((color as u64) << Self::GC_COLOR_SHIFT) & Self::GC_COLOR_MASK;
        self.0 = (self.0 & !Self::GC_COLOR_MASK) | bits;
        self
    }
}

impl core::fmt::Debug for Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Header")
            .field("class_index", &self.class_index())
            .field("format", &self.format())
            .field("identity_hash", &self.identity_hash())
            .field("flags", &self.flags())
            .field("slot_count", &self.slot_count())
            .finish()
    }
}
