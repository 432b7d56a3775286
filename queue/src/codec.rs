//! Byte encoding of [Message] for engines that persist or transmit messages.
//!
//! # Format
//!
//! ```text
//! +---------+----------+-------------------+-------------------------+----------------+
//! | Version | Id (opt) | Timestamp (u64ms) | Queue Timestamp (u64ms) | Requeues (u32) |
//! +---------+----------+-------------------+-------------------------+----------------+
//! +-----------------+------------------+------+
//! | Partition (opt) | Len (varint)     | Data |
//! +-----------------+------------------+------+
//! ```
//!
//! Optional fields are prefixed with a presence byte. Timestamps are stored with millisecond
//! precision. Fixed-width integers are big-endian.
//!
//! Decoding takes a [RangeCfg] bounding the payload length.

use crate::{
    id::{read_str, str_size, write_str},
    time::from_millis,
    Id, Message,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, RangeCfg, Read, ReadExt, Write};
use commonware_utils::SystemTimeExt;

/// Current encoding version.
const VERSION: u8 = 1;

impl<I: Id> Write for Message<I> {
    fn write(&self, buf: &mut impl BufMut) {
        VERSION.write(buf);
        self.id().is_some().write(buf);
        if let Some(id) = self.id() {
            id.write(buf);
        }
        self.timestamp().epoch_millis().write(buf);
        self.queue_timestamp().epoch_millis().write(buf);
        self.num_requeues().write(buf);
        match self.partition_key() {
            Some(key) => {
                true.write(buf);
                write_str(key, buf);
            }
            None => false.write(buf),
        }
        self.data().len().write(buf);
        buf.put_slice(self.data());
    }
}

impl<I: Id> EncodeSize for Message<I> {
    fn encode_size(&self) -> usize {
        let id = self.id().map_or(0, |id| id.encode_size());
        let partition = self.partition_key().map_or(0, str_size);
        VERSION.encode_size()
            + 1
            + id
            + u64::SIZE
            + u64::SIZE
            + u32::SIZE
            + 1
            + partition
            + self.data().len().encode_size()
            + self.data().len()
    }
}

impl<I: Id> Read for Message<I> {
    type Cfg = RangeCfg;

    fn read_cfg(buf: &mut impl Buf, payload: &RangeCfg) -> Result<Self, Error> {
        let version = u8::read(buf)?;
        if version != VERSION {
            return Err(Error::Invalid("Message", "unknown version"));
        }
        let id = Option::<I>::read(buf)?;
        let timestamp = from_millis(u64::read(buf)?);
        let queue_timestamp = from_millis(u64::read(buf)?);
        let num_requeues = u32::read(buf)?;
        let partition_key = if bool::read(buf)? {
            Some(read_str(buf)?)
        } else {
            None
        };
        let len = usize::read_cfg(buf, payload)?;
        if buf.remaining() < len {
            return Err(Error::EndOfBuffer);
        }
        let data = buf.copy_to_bytes(len);
        Ok(Message::from_parts(
            id,
            data,
            timestamp,
            queue_timestamp,
            num_requeues,
            partition_key,
        ))
    }
}
