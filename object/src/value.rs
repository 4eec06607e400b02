/// Tag constants.
pub const TAG_BITS: u32 = 3;
const TAG_MASK: u64 = 0b111;
const SMALL_INTEGER_MASK: u64 = 0b1;
const SMALL_INTEGER_TAG: u64 = 0b001;
const CHARACTER_TAG: u64 = 0b010;
const SMALL_FLOAT_TAG: u64 = 0b100;
const POINTER_TAG: u64 = 0b000;

/// Size in bytes of one tagged word.
pub const WORD_SIZE: usize = 8;

pub const SMALL_INTEGER_MIN: i64 = -(1i64 << 62);
pub const SMALL_INTEGER_MAX: i64 = (1i64 << 62) - 1;

/// Class indices of the immediate classes. They equal the tag bits so the
/// class of an immediate is derivable without touching memory.
pub const SMALL_INTEGER_CLASS_INDEX: u32 = 1;
pub const CHARACTER_CLASS_INDEX: u32 = 2;
pub const SMALL_FLOAT_CLASS_INDEX: u32 = 4;

// SmallFloat64: the IEEE bits are rotated left by one so the sign lands in
// bit 0, then the 11-bit exponent is re-biased so only 8 bits remain.
const SMALL_FLOAT_EXPONENT_OFFSET: u64 = 896;
const SMALL_FLOAT_EXPONENT_RANGE: u64 = 256;
const ROTATED_EXPONENT_SHIFT: u32 = 53;

/// The variant selected by the low tag bits of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Object,
    SmallInteger,
    Character,
    SmallFloat,
    /// The null word or the reserved `0b110` tag.
    Invalid,
}

/// A fully decoded [`Value`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
    Object(usize),
    SmallInteger(i64),
    Character(u32),
    SmallFloat(f64),
    Invalid(u64),
}

/// A tagged 64-bit value (an "oop").
///
/// Encoding:
/// - **Object**:       `...XXXX000`: byte address inside the object memory,
///   8-byte aligned and never zero.
/// - **SmallInteger**: `...XXXXXX1`: 63-bit signed integer.
/// - **Character**:    `...XXXX010`: code point shifted left by 3.
/// - **SmallFloat**:   `...XXXX100`: re-biased, rotated IEEE double.
///
/// Every accessor checks the tag first; a payload is never inferred from the
/// numeric range of the raw word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    /// The all-zero word. Used for pointer slots before `nil` exists.
    pub const ZERO: Value = Value(0);

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn kind(self) -> ValueKind {
        if self.0 & SMALL_INTEGER_MASK == SMALL_INTEGER_TAG {
            return ValueKind::SmallInteger;
        }
        match self.0 & TAG_MASK {
            POINTER_TAG if self.0 != 0 => ValueKind::Object,
            CHARACTER_TAG => ValueKind::Character,
            SMALL_FLOAT_TAG => ValueKind::SmallFloat,
            _ => ValueKind::Invalid,
        }
    }

    pub fn decode(self) -> Decoded {
        match self.kind() {
            ValueKind::Object => Decoded::Object(self.0 as usize),
            ValueKind::SmallInteger => Decoded::SmallInteger(self.small_integer_payload()),
            ValueKind::Character => Decoded::Character((self.0 >> TAG_BITS) as u32),
            ValueKind::SmallFloat => Decoded::SmallFloat(self.small_float_payload()),
            ValueKind::Invalid => Decoded::Invalid(self.0),
        }
    }

    /// Class index of an immediate value, `None` for heap objects.
    #[inline]
    pub const fn immediate_class_index(self) -> Option<u32> {
        match self.kind() {
            ValueKind::SmallInteger => Some(SMALL_INTEGER_CLASS_INDEX),
            ValueKind::Character => Some(CHARACTER_CLASS_INDEX),
            ValueKind::SmallFloat => Some(SMALL_FLOAT_CLASS_INDEX),
            ValueKind::Object | ValueKind::Invalid => None,
        }
    }

    #[inline(always)]
    pub const fn is_immediate(self) -> bool {
        self.immediate_class_index().is_some()
    }

    // ── SmallInteger ───────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_small_integer(self) -> bool {
        self.0 & SMALL_INTEGER_MASK == SMALL_INTEGER_TAG
    }

    /// Encode a small integer.
    ///
    /// `n` must lie within [`SMALL_INTEGER_MIN`]..=[`SMALL_INTEGER_MAX`];
    /// this is a caller precondition, only checked in debug builds. Use
    /// [`Value::try_from_i64`] when the range is not known.
    #[inline(always)]
    pub fn from_i64(n: i64) -> Self {
        debug_assert!(
            Self::fits_small_integer(n),
            "small integer overflow: {n}"
        );
        Self(((n as u64) << 1) | SMALL_INTEGER_TAG)
    }

    #[inline]
    pub fn try_from_i64(n: i64) -> Option<Self> {
        Self::fits_small_integer(n).then(|| Self::from_i64(n))
    }

    #[inline(always)]
    pub const fn fits_small_integer(n: i64) -> bool {
        n >= SMALL_INTEGER_MIN && n <= SMALL_INTEGER_MAX
    }

    #[inline]
    pub const fn as_small_integer(self) -> Option<i64> {
        if self.is_small_integer() {
            Some(self.small_integer_payload())
        } else {
            None
        }
    }

    #[inline(always)]
    const fn small_integer_payload(self) -> i64 {
        (self.0 as i64) >> 1
    }

    // ── Character ──────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_character(self) -> bool {
        self.0 & TAG_MASK == CHARACTER_TAG
    }

    #[inline]
    pub const fn from_code_point(code: u32) -> Self {
        Self(((code as u64) << TAG_BITS) | CHARACTER_TAG)
    }

    #[inline]
    pub const fn from_char(c: char) -> Self {
        Self::from_code_point(c as u32)
    }

    #[inline]
    pub const fn as_code_point(self) -> Option<u32> {
        if self.is_character() {
            Some((self.0 >> TAG_BITS) as u32)
        } else {
            None
        }
    }

    #[inline]
    pub fn as_char(self) -> Option<char> {
        self.as_code_point().and_then(char::from_u32)
    }

    // ── SmallFloat ─────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_small_float(self) -> bool {
        self.0 & TAG_MASK == SMALL_FLOAT_TAG
    }

    /// Encode a double as an immediate, if its exponent fits the 8-bit
    /// window. `±0.0` is always encodable; infinities, NaNs, subnormals and
    /// very large or very small magnitudes are not.
    pub fn try_from_f64(value: f64) -> Option<Self> {
        let bits = value.to_bits();
        let rotated = bits.rotate_left(1);
        if rotated <= 1 {
            return Some(Self((rotated << TAG_BITS) | SMALL_FLOAT_TAG));
        }

        let exponent = (bits >> 52) & 0x7FF;
        if exponent <= SMALL_FLOAT_EXPONENT_OFFSET
            || exponent >= SMALL_FLOAT_EXPONENT_OFFSET + SMALL_FLOAT_EXPONENT_RANGE
        {
            return None;
        }

        let rebased = rotated - (SMALL_FLOAT_EXPONENT_OFFSET << ROTATED_EXPONENT_SHIFT);
        Some(Self((rebased << TAG_BITS) | SMALL_FLOAT_TAG))
    }

    #[inline]
    pub fn as_small_float(self) -> Option<f64> {
        if self.is_small_float() {
            Some(self.small_float_payload())
        } else {
            None
        }
    }

    fn small_float_payload(self) -> f64 {
        let rebased = self.0 >> TAG_BITS;
        let rotated = if rebased <= 1 {
            rebased
        } else {
            rebased + (SMALL_FLOAT_EXPONENT_OFFSET << ROTATED_EXPONENT_SHIFT)
        };
        f64::from_bits(rotated.rotate_right(1))
    }

    // ── Object ─────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_object(self) -> bool {
        self.0 != 0 && self.0 & TAG_MASK == POINTER_TAG
    }

    /// Wrap an object memory address.
    #[inline(always)]
    pub fn from_address(address: usize) -> Self {
        debug_assert!(address != 0, "null object address");
        debug_assert!(
            address as u64 & TAG_MASK == 0,
            "object address not word aligned: {address:#x}"
        );
        Self(address as u64)
    }

    #[inline]
    pub const fn as_object(self) -> Option<usize> {
        if self.is_object() {
            Some(self.0 as usize)
        } else {
            None
        }
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.decode() {
            Decoded::Object(address) => write!(f, "Object(0x{address:x})"),
            Decoded::SmallInteger(n) => write!(f, "SmallInteger({n})"),
            Decoded::Character(code) => match char::from_u32(code) {
                Some(c) => write!(f, "Character({c:?})"),
                None => write!(f, "Character(U+{code:X})"),
            },
            Decoded::SmallFloat(x) => write!(f, "SmallFloat({x})"),
            Decoded::Invalid(raw) => write!(f, "Invalid(0x{raw:016x})"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::from_i64(value)
    }
}

impl From<char> for Value {
    fn from(value: char) -> Self {
        Value::from_char(value)
    }
}

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn small_integer_sets_low_bit_and_reports_only_small_integer() {
        let v = Value::from_i64(42);
        assert_eq!(v.raw() & 0b1, 1);
        assert!(v.is_small_integer());
        assert!(!v.is_character());
        assert!(!v.is_small_float());
        assert!(!v.is_object());
        assert_eq!(v.kind(), ValueKind::SmallInteger);
    }

    #[test]
    fn small_integer_round_trip_at_range_edges() {
        for &n in &[
            0i64,
            1,
            -1,
            7,
            -7,
            1 << 40,
            -(1 << 40),
            SMALL_INTEGER_MAX,
            SMALL_INTEGER_MIN,
        ] {
            let v = Value::from_i64(n);
            assert_eq!(v.as_small_integer(), Some(n), "round trip of {n}");
            assert!(v.is_small_integer());
            assert!(!v.is_character());
            assert!(!v.is_small_float());
        }
    }

    #[test]
    fn try_from_i64_rejects_out_of_range() {
        assert!(Value::try_from_i64(SMALL_INTEGER_MAX + 1).is_none());
        assert!(Value::try_from_i64(SMALL_INTEGER_MIN - 1).is_none());
        assert!(Value::try_from_i64(i64::MAX).is_none());
        assert!(Value::try_from_i64(12).is_some());
    }

    #[test]
    fn character_round_trip() {
        for c in ['a', 'Z', '0', '\n', 'λ', '🦀'] {
            let v = Value::from_char(c);
            assert!(v.is_character());
            assert!(!v.is_small_integer());
            assert!(!v.is_small_float());
            assert!(!v.is_object());
            assert_eq!(v.as_char(), Some(c));
        }
    }

    #[test]
    fn small_float_round_trip() {
        for &x in &[0.0f64, -0.0, 1.0, -1.0, 3.25, 1.0e-30, 6.02e23, -123.456] {
            let v = Value::try_from_f64(x).expect("encodable float");
            assert!(v.is_small_float());
            assert!(!v.is_small_integer());
            assert!(!v.is_character());
            let back = v.as_small_float().expect("small float");
            assert_eq!(back.to_bits(), x.to_bits(), "round trip of {x}");
        }
    }

    #[test]
    fn small_float_rejects_exponents_outside_window() {
        assert!(Value::try_from_f64(f64::INFINITY).is_none());
        assert!(Value::try_from_f64(f64::NAN).is_none());
        assert!(Value::try_from_f64(1.0e300).is_none());
        assert!(Value::try_from_f64(1.0e-300).is_none());
        assert!(Value::try_from_f64(f64::MIN_POSITIVE / 2.0).is_none());
    }

    #[test]
    fn object_tagging() {
        let v = Value::from_address(0x40);
        assert!(v.is_object());
        assert!(!v.is_small_integer());
        assert!(!v.is_character());
        assert!(!v.is_small_float());
        assert_eq!(v.as_object(), Some(0x40));
        assert_eq!(v.immediate_class_index(), None);
    }

    #[test]
    fn zero_is_not_an_object() {
        assert!(!Value::ZERO.is_object());
        assert_eq!(Value::ZERO.kind(), ValueKind::Invalid);
    }

    #[test]
    fn immediate_class_indices_are_distinct() {
        assert_eq!(
            Value::from_i64(-3).immediate_class_index(),
            Some(SMALL_INTEGER_CLASS_INDEX)
        );
        assert_eq!(
            Value::from_char('x').immediate_class_index(),
            Some(CHARACTER_CLASS_INDEX)
        );
        assert_eq!(
            Value::try_from_f64(2.5).and_then(Value::immediate_class_index),
            Some(SMALL_FLOAT_CLASS_INDEX)
        );
    }

    #[test]
    fn accessors_refuse_other_tags() {
        let int = Value::from_i64(65);
        assert_eq!(int.as_char(), None);
        assert_eq!(int.as_small_float(), None);
        assert_eq!(int.as_object(), None);

        let chr = Value::from_char('A');
        assert_eq!(chr.as_small_integer(), None);
    }
}
