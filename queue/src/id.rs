//! Message identifiers.
//!
//! [Message](crate::Message) is generic over its identifier type. Any type implementing [Id] can be
//! used; implementations are provided for `u64` and [StringId].
//!
//! # Generated Identifiers
//!
//! When a producer does not assign an id, the engine assigns one from its [Generator]. Generated
//! values are time-ordered and strictly increasing for a given generator:
//!
//! ```text
//! +-------------------------------------------+----------------------+
//! |  milliseconds since 2024-01-01 (44 bits)  |  sequence (20 bits)  |
//! +-------------------------------------------+----------------------+
//! ```
//!
//! If more than `2^20` values are requested within the same millisecond (or the clock moves
//! backwards), the generator keeps incrementing the previous value instead of reusing the clock.

use bytes::{Buf, BufMut};
use commonware_codec::{Codec, EncodeSize, Error, RangeCfg, Read, Write};
use commonware_utils::SystemTimeExt;
use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    sync::atomic::{AtomicU64, Ordering},
    time::SystemTime,
};

/// Epoch used by [Generator] (2024-01-01T00:00:00Z), in milliseconds since the unix epoch.
pub const EPOCH_MILLIS: u64 = 1_704_067_200_000;

/// Number of low bits reserved for the per-millisecond sequence.
const SEQUENCE_BITS: u32 = 20;

/// Largest generated value. Keeping the top bit clear allows storage in signed 64-bit columns.
const MAX_GENERATED: u64 = i64::MAX as u64;

/// Generator of time-ordered, strictly increasing `u64` values.
#[derive(Debug, Default)]
pub struct Generator {
    last: AtomicU64,
}

impl Generator {
    /// Create a generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator whose values are all greater than `floor`.
    ///
    /// Used by persistent engines to resume above the largest key found on disk.
    pub fn after(floor: u64) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    /// Returns the next value.
    pub fn next(&self) -> u64 {
        let millis = SystemTime::now().epoch_millis().saturating_sub(EPOCH_MILLIS);
        let base = (millis << SEQUENCE_BITS).min(MAX_GENERATED);
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = base.max(last + 1);
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

/// An identifier type usable as [Message](crate::Message) id.
///
/// Ids are serialized with [commonware_codec] and must decode without configuration. The encoding
/// doubles as the storage key of persistent engines.
pub trait Id:
    Codec + Read<Cfg = ()> + Clone + Debug + Eq + Hash + Ord + Send + Sync + 'static
{
    /// Generate a fresh id.
    fn generate(generator: &Generator) -> Self;
}

impl Id for u64 {
    fn generate(generator: &Generator) -> Self {
        generator.next()
    }
}

/// A textual id.
///
/// Encoded as a varint length followed by UTF-8 bytes. Generated values are zero-padded hex, so
/// they sort in generation order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(String);

impl StringId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StringId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StringId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for StringId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Write for StringId {
    fn write(&self, buf: &mut impl BufMut) {
        write_str(&self.0, buf);
    }
}

impl EncodeSize for StringId {
    fn encode_size(&self) -> usize {
        str_size(&self.0)
    }
}

impl Read for StringId {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        read_str(buf).map(Self)
    }
}

impl Id for StringId {
    fn generate(generator: &Generator) -> Self {
        Self(format!("{:016x}", generator.next()))
    }
}

/// Bytes [write_str] produces for `value`.
pub(crate) fn str_size(value: &str) -> usize {
    value.len().encode_size() + value.len()
}

/// Write `value` as a varint length followed by its UTF-8 bytes.
pub(crate) fn write_str(value: &str, buf: &mut impl BufMut) {
    value.len().write(buf);
    buf.put_slice(value.as_bytes());
}

/// Read a string written by [write_str].
pub(crate) fn read_str(buf: &mut impl Buf) -> Result<String, Error> {
    let len = usize::read_cfg(buf, &RangeCfg::from(..))?;
    if buf.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| Error::Invalid("str", "invalid utf-8"))
}
