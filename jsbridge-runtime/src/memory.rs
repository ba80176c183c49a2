//! Typed shared memory
//!
//! A `HostMemory` is a typed window over a `SharedBuffer`. Crossing the
//! boundary never copies the bytes: the guest typed array and the host memory
//! value alias the same buffer. Access is memory safe but otherwise
//! unsynchronised between the two sides.

use std::fmt;
use std::sync::Arc;

use num_traits::NumCast;
use parking_lot::RwLock;

use crate::error::HostError;

/// Element kind of a typed memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NumericKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl NumericKind {
    pub const ALL: [NumericKind; 10] = [
        Self::I8,
        Self::U8,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::U32,
        Self::I64,
        Self::U64,
        Self::F32,
        Self::F64,
    ];

    /// Size of one element in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    #[inline]
    pub const fn is_integral(self) -> bool {
        !self.is_float()
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    #[inline]
    pub const fn is_unsigned(self) -> bool {
        matches!(self, Self::U8 | Self::U16 | Self::U32 | Self::U64)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }

    /// Name of the guest typed-array constructor for this element kind.
    pub const fn typed_array_name(self) -> &'static str {
        match self {
            Self::I8 => "Int8Array",
            Self::U8 => "Uint8Array",
            Self::I16 => "Int16Array",
            Self::U16 => "Uint16Array",
            Self::I32 => "Int32Array",
            Self::U32 => "Uint32Array",
            Self::I64 => "BigInt64Array",
            Self::U64 => "BigUint64Array",
            Self::F32 => "Float32Array",
            Self::F64 => "Float64Array",
        }
    }

    /// Whether a guest number is representable in this kind without loss
    /// of integrality or range. Floats accept everything.
    pub fn accepts(self, value: f64) -> bool {
        if self.is_float() {
            return true;
        }
        if !value.is_finite() || value.fract() != 0.0 {
            return false;
        }
        match self {
            Self::I8 => <i8 as NumCast>::from(value).is_some(),
            Self::U8 => <u8 as NumCast>::from(value).is_some(),
            Self::I16 => <i16 as NumCast>::from(value).is_some(),
            Self::U16 => <u16 as NumCast>::from(value).is_some(),
            Self::I32 => <i32 as NumCast>::from(value).is_some(),
            Self::U32 => <u32 as NumCast>::from(value).is_some(),
            Self::I64 => <i64 as NumCast>::from(value).is_some(),
            Self::U64 => <u64 as NumCast>::from(value).is_some(),
            Self::F32 | Self::F64 => true,
        }
    }
}

impl fmt::Display for NumericKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element types that can be read from and written to typed memory.
pub trait Element: Copy + Send + Sync + 'static {
    const KIND: NumericKind;

    fn read(bytes: &[u8]) -> Self;
    fn write(self, bytes: &mut [u8]);
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Option<Self>;
}

macro_rules! impl_element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const KIND: NumericKind = NumericKind::$kind;

                #[inline]
                fn read(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                    <$ty>::from_ne_bytes(raw)
                }

                #[inline]
                fn write(self, bytes: &mut [u8]) {
                    bytes[..std::mem::size_of::<$ty>()].copy_from_slice(&self.to_ne_bytes());
                }

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }

                #[inline]
                fn from_f64(value: f64) -> Option<Self> {
                    if NumericKind::$kind.accepts(value) {
                        <$ty as NumCast>::from(value)
                    } else {
                        None
                    }
                }
            }
        )*
    };
}

impl_element! {
    i8 => I8, u8 => U8, i16 => I16, u16 => U16, i32 => I32,
    u32 => U32, i64 => I64, u64 => U64, f32 => F32, f64 => F64,
}

/// Reference-counted byte buffer shared between host and guest.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<RwLock<Vec<u8>>>);

impl SharedBuffer {
    pub fn zeroed(len: usize) -> Self {
        Self(Arc::new(RwLock::new(vec![0; len])))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Arc::new(RwLock::new(bytes)))
    }

    pub fn byte_len(&self) -> usize {
        self.0.read().len()
    }

    pub fn ptr_eq(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("byte_len", &self.byte_len())
            .finish()
    }
}

/// Typed view over a shared buffer.
#[derive(Clone, Debug)]
pub struct HostMemory {
    buffer: SharedBuffer,
    kind: NumericKind,
    /// Offset in elements
    offset: usize,
    len: usize,
    read_only: bool,
}

impl HostMemory {
    /// Allocate zeroed memory of `len` elements.
    pub fn new(kind: NumericKind, len: usize) -> Self {
        Self {
            buffer: SharedBuffer::zeroed(len * kind.size()),
            kind,
            offset: 0,
            len,
            read_only: false,
        }
    }

    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        let size = T::KIND.size();
        let mut bytes = vec![0u8; values.len() * size];
        for (value, chunk) in values.iter().zip(bytes.chunks_exact_mut(size)) {
            value.write(chunk);
        }
        Self {
            buffer: SharedBuffer::from_bytes(bytes),
            kind: T::KIND,
            offset: 0,
            len: values.len(),
            read_only: false,
        }
    }

    /// View an existing buffer. Fails when the window does not fit.
    pub fn view(
        buffer: SharedBuffer,
        kind: NumericKind,
        offset: usize,
        len: usize,
    ) -> Result<Self, HostError> {
        let end = (offset + len) * kind.size();
        let available = buffer.byte_len();
        if end > available {
            return Err(HostError::Argument(format!(
                "{len} {kind} elements at offset {offset} exceed buffer of {available} bytes"
            )));
        }
        Ok(Self {
            buffer,
            kind,
            offset,
            len,
            read_only: false,
        })
    }

    pub fn kind(&self) -> NumericKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Same memory, refusing writes through this handle.
    pub fn as_read_only(&self) -> Self {
        Self {
            read_only: true,
            ..self.clone()
        }
    }

    /// Whether both views alias the same underlying buffer.
    pub fn shares_buffer_with(&self, other: &HostMemory) -> bool {
        self.buffer.ptr_eq(&other.buffer)
    }

    fn byte_range(&self, index: usize) -> Result<std::ops::Range<usize>, HostError> {
        if index >= self.len {
            return Err(HostError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        let size = self.kind.size();
        let start = (self.offset + index) * size;
        Ok(start..start + size)
    }

    pub fn read<T: Element>(&self, index: usize) -> Result<T, HostError> {
        self.check_kind(T::KIND)?;
        let range = self.byte_range(index)?;
        let bytes = self.buffer.0.read();
        Ok(T::read(&bytes[range]))
    }

    pub fn write<T: Element>(&self, index: usize, value: T) -> Result<(), HostError> {
        self.check_kind(T::KIND)?;
        if self.read_only {
            return Err(HostError::ReadOnly);
        }
        let range = self.byte_range(index)?;
        let mut bytes = self.buffer.0.write();
        value.write(&mut bytes[range]);
        Ok(())
    }

    /// Read one element widened to a guest number.
    pub fn get(&self, index: usize) -> Result<f64, HostError> {
        match self.kind {
            NumericKind::I8 => self.read::<i8>(index).map(Element::to_f64),
            NumericKind::U8 => self.read::<u8>(index).map(Element::to_f64),
            NumericKind::I16 => self.read::<i16>(index).map(Element::to_f64),
            NumericKind::U16 => self.read::<u16>(index).map(Element::to_f64),
            NumericKind::I32 => self.read::<i32>(index).map(Element::to_f64),
            NumericKind::U32 => self.read::<u32>(index).map(Element::to_f64),
            NumericKind::I64 => self.read::<i64>(index).map(Element::to_f64),
            NumericKind::U64 => self.read::<u64>(index).map(Element::to_f64),
            NumericKind::F32 => self.read::<f32>(index).map(Element::to_f64),
            NumericKind::F64 => self.read::<f64>(index),
        }
    }

    /// Store a guest number, rejecting values the element kind cannot hold.
    pub fn set(&self, index: usize, value: f64) -> Result<(), HostError> {
        fn narrow<T: Element>(value: f64) -> Result<T, HostError> {
            T::from_f64(value).ok_or_else(|| HostError::TypeMismatch {
                expected: T::KIND.to_string(),
                found: value.to_string(),
            })
        }
        match self.kind {
            NumericKind::I8 => self.write(index, narrow::<i8>(value)?),
            NumericKind::U8 => self.write(index, narrow::<u8>(value)?),
            NumericKind::I16 => self.write(index, narrow::<i16>(value)?),
            NumericKind::U16 => self.write(index, narrow::<u16>(value)?),
            NumericKind::I32 => self.write(index, narrow::<i32>(value)?),
            NumericKind::U32 => self.write(index, narrow::<u32>(value)?),
            NumericKind::I64 => self.write(index, narrow::<i64>(value)?),
            NumericKind::U64 => self.write(index, narrow::<u64>(value)?),
            NumericKind::F32 => self.write(index, value as f32),
            NumericKind::F64 => self.write(index, value),
        }
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, HostError> {
        (0..self.len).map(|i| self.read(i)).collect()
    }

    fn check_kind(&self, requested: NumericKind) -> Result<(), HostError> {
        if requested == self.kind {
            Ok(())
        } else {
            Err(HostError::TypeMismatch {
                expected: self.kind.to_string(),
                found: requested.to_string(),
            })
        }
    }
}

impl PartialEq for HostMemory {
    /// Memory values are equal when they are the same window over the same
    /// buffer.
    fn eq(&self, other: &Self) -> bool {
        self.shares_buffer_with(other)
            && self.kind == other.kind
            && self.offset == other.offset
            && self.len == other.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_sizes() {
        assert_eq!(NumericKind::I8.size(), 1);
        assert_eq!(NumericKind::U16.size(), 2);
        assert_eq!(NumericKind::F32.size(), 4);
        assert_eq!(NumericKind::I64.size(), 8);
    }

    #[test]
    fn test_kind_accepts() {
        assert!(NumericKind::U8.accepts(255.0));
        assert!(!NumericKind::U8.accepts(256.0));
        assert!(!NumericKind::U8.accepts(-1.0));
        assert!(!NumericKind::I32.accepts(1.5));
        assert!(NumericKind::F32.accepts(1.5));
        assert!(!NumericKind::I64.accepts(f64::NAN));
    }

    #[test]
    fn test_views_share_bytes() {
        let memory = HostMemory::from_slice(&[1i32, 2, 3]);
        let alias = memory.clone();
        alias.write(1, 42i32).unwrap();
        assert_eq!(memory.to_vec::<i32>().unwrap(), vec![1, 42, 3]);
        assert!(memory.shares_buffer_with(&alias));
    }

    #[test]
    fn test_window_offsets() {
        let memory = HostMemory::from_slice(&[10u16, 20, 30, 40]);
        let window = HostMemory::view(memory.buffer().clone(), NumericKind::U16, 2, 2).unwrap();
        assert_eq!(window.get(0).unwrap(), 30.0);
        window.set(1, 7.0).unwrap();
        assert_eq!(memory.read::<u16>(3).unwrap(), 7);

        assert!(HostMemory::view(memory.buffer().clone(), NumericKind::U16, 3, 2).is_err());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let memory = HostMemory::from_slice(&[1.0f64]).as_read_only();
        assert_eq!(memory.set(0, 2.0), Err(HostError::ReadOnly));
        assert_eq!(memory.get(0).unwrap(), 1.0);
    }

    #[test]
    fn test_kind_mismatch_and_bounds() {
        let memory = HostMemory::new(NumericKind::U8, 2);
        assert!(matches!(memory.read::<i32>(0), Err(HostError::TypeMismatch { .. })));
        assert!(matches!(memory.get(2), Err(HostError::IndexOutOfRange { index: 2, len: 2 })));
        assert!(memory.set(0, 300.0).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_integer_kinds_match_their_range(n in -1_000_000i64..1_000_000) {
            let value = n as f64;
            proptest::prop_assert_eq!(NumericKind::U16.accepts(value), (0..=65_535).contains(&n));
            proptest::prop_assert_eq!(NumericKind::I8.accepts(value), (-128..=127).contains(&n));
            proptest::prop_assert!(NumericKind::I32.accepts(value));
            proptest::prop_assert!(!NumericKind::I32.accepts(value + 0.5));
        }
    }
}
