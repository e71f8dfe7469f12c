//! Record and message codecs.
//!
//! A message is a sequence of data blocks, each prefixed by a category
//! number and a 16-bit big-endian block length that counts the 3-byte
//! header itself. Inside a block, a record is an FSPEC presence bitmap
//! followed by the present items in UAP order.
//!
//! ```text
//! +----------+-----------------+-------------//------------+
//! | category | length (BE u16) |   FSPEC + data items      |
//! +----------+-----------------+-------------//------------+
//! ```

pub mod field;
pub mod fspec;

pub use field::Value;

use std::fmt::Display;
use std::io::{ErrorKind, Read};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::uap::{Category, CategoryRegistry};
use crate::{Error, Result};

/// Wire header prefixed to every record block.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub category: Category,
    /// Block length in bytes, including this 3-byte header.
    pub len: u16,
}

impl RecordHeader {
    /// Size of an encoded [`RecordHeader`].
    pub const LEN: usize = 3;

    /// Decode from bytes. Returns `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        Some(RecordHeader {
            category: buf[0],
            len: u16::from_be_bytes([buf[1], buf[2]]),
        })
    }

    fn encode_into(self, out: &mut Vec<u8>) {
        out.push(self.category);
        out.extend_from_slice(&self.len.to_be_bytes());
    }
}

/// One decoded surveillance report.
///
/// Values keep the order the UAP declares. Identifiers are unique within a
/// record; [`Record::set`] replaces rather than appends.
///
/// A record compares as a mapping: two records are equal when they carry
/// the same category and the same identifier-to-value pairs, whatever
/// order the fields were set in. [`Record::encode`] likewise emits fields
/// in UAP declaration order regardless of insertion order.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Record {
    pub category: Category,
    fields: Vec<(String, Value)>,
}

impl Record {
    #[must_use]
    pub fn new(category: Category) -> Self {
        Record {
            category,
            fields: Vec::new(),
        }
    }

    /// Builder-style [`Record::set`].
    #[must_use]
    pub fn with_field(mut self, id: impl Into<String>, value: Value) -> Self {
        self.set(id, value);
        self
    }

    /// Set the value for `id`, replacing any existing value.
    pub fn set(&mut self, id: impl Into<String>, value: Value) {
        let id = id.into();
        match self.fields.iter_mut().find(|(fid, _)| *fid == id) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((id, value)),
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(fid, _)| fid == id)
            .map(|(_, value)| value)
    }

    /// Identifiers and values in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(id, value)| (id.as_str(), value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Decode one record body (FSPEC plus items, no block header) of
    /// `category` from `buf`, returning the record and the bytes consumed.
    ///
    /// # Errors
    /// [`Error::UnknownCategory`] if the registry has no UAP for
    /// `category`; otherwise whatever the FSPEC or item codecs report.
    pub fn decode(
        registry: &CategoryRegistry,
        category: Category,
        buf: &[u8],
    ) -> Result<(Record, usize)> {
        let spec = registry
            .get(category)
            .ok_or(Error::UnknownCategory(category))?;
        let what = format!("CAT{category:03}");
        let (present, mut consumed) = fspec::decode(buf, spec.fields.len(), &what)?;
        let mut record = Record::new(category);
        for (field_spec, present) in spec.fields.iter().zip(&present) {
            if !present {
                continue;
            }
            let (value, used) = field::decode(field_spec, &buf[consumed..])?;
            trace!(category, field = %field_spec.id, used, "decoded item");
            consumed += used;
            record.fields.push((field_spec.id.clone(), value));
        }
        Ok((record, consumed))
    }

    /// Encode this record's FSPEC and items in UAP order, appending to
    /// `out`. The block header is the message codec's job.
    ///
    /// # Errors
    /// [`Error::UnknownCategory`] if the registry has no UAP for this
    /// record's category, [`Error::InvalidEncodingValue`] if a field is not
    /// declared by the UAP or a value violates its declared shape.
    pub fn encode(&self, registry: &CategoryRegistry, out: &mut Vec<u8>) -> Result<()> {
        let spec = registry
            .get(self.category)
            .ok_or(Error::UnknownCategory(self.category))?;
        let mut present = vec![false; spec.fields.len()];
        for (id, _) in &self.fields {
            let Some(idx) = spec.fields.iter().position(|f| f.id == *id) else {
                return Err(Error::InvalidEncodingValue {
                    field: id.clone(),
                    reason: format!("not declared by category {:03}", self.category),
                });
            };
            present[idx] = true;
        }
        fspec::encode(&present, out);
        for field_spec in &spec.fields {
            if let Some(value) = self.get(&field_spec.id) {
                field::encode(field_spec, value, out)?;
            }
        }
        Ok(())
    }
}

// mapping equality: identifiers are unique, so pairwise lookup suffices
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.category == other.category
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(id, value)| other.get(id) == Some(value))
    }
}

impl Eq for Record {}

impl Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.fields.iter().map(|(id, _)| id.as_str()).collect();
        write!(
            f,
            "Record{{category={:03}, fields=[{}]}}",
            self.category,
            ids.join(", ")
        )
    }
}

/// Records extracted from one input buffer.
///
/// `consumed` counts the bytes of successfully decoded blocks; bytes from
/// `consumed` onward were not understood. `error` is the reason decoding
/// stopped before the end of the input, if it did.
#[derive(Debug, Default)]
pub struct Message {
    pub records: Vec<Record>,
    pub consumed: usize,
    pub error: Option<Error>,
}

/// Split `buf` into consecutive record blocks and decode each.
///
/// Decoding is as forgiving as the framing allows: records decoded before
/// a failure are kept, and the failure rides along in [`Message::error`]
/// instead of discarding them. Fewer than [`RecordHeader::LEN`] trailing
/// bytes simply end the walk.
///
/// # Examples
/// ```
/// use asterix::record::{decode_message, Value};
/// use asterix::uap::{CategoryRegistry, CategorySpec, FieldKind, FieldSpec};
///
/// let mut registry = CategoryRegistry::new();
/// registry.register(CategorySpec::new(
///     48,
///     vec![FieldSpec::new("010", FieldKind::Fixed { len: 2 })],
/// ));
///
/// // CAT048 block of 6 bytes: FSPEC 0x80, then I048/010
/// let message = decode_message(&registry, &[0x30, 0x00, 0x06, 0x80, 0x01, 0x02]);
/// assert!(message.error.is_none());
/// assert_eq!(message.consumed, 6);
/// assert_eq!(
///     message.records[0].get("010"),
///     Some(&Value::Bytes(vec![0x01, 0x02]))
/// );
/// ```
#[must_use]
pub fn decode_message(registry: &CategoryRegistry, buf: &[u8]) -> Message {
    let mut message = Message::default();
    while let Some(header) = RecordHeader::decode(&buf[message.consumed..]) {
        let declared = header.len as usize;
        let remaining = buf.len() - message.consumed;
        if declared < RecordHeader::LEN || declared > remaining {
            message.error = Some(Error::TruncatedField {
                field: format!("CAT{:03} record", header.category),
                needed: declared.max(RecordHeader::LEN),
                remaining: remaining.min(declared),
            });
            break;
        }
        let body = &buf[message.consumed + RecordHeader::LEN..message.consumed + declared];
        match Record::decode(registry, header.category, body) {
            Ok((record, used)) => {
                if used < body.len() {
                    warn!(
                        category = header.category,
                        declared,
                        used = used + RecordHeader::LEN,
                        "record ended before its declared block length"
                    );
                }
                message.records.push(record);
                message.consumed += declared;
            }
            Err(err) => {
                debug!(category = header.category, %err, "message decode stopped");
                message.error = Some(err);
                break;
            }
        }
    }
    trace!(
        records = message.records.len(),
        consumed = message.consumed,
        len = buf.len(),
        "decoded message"
    );
    message
}

/// Encode `records` as consecutive record blocks, each with its category
/// and block-length header.
///
/// # Errors
/// Whatever [`Record::encode`] reports, or [`Error::InvalidEncodingValue`]
/// if an encoded block overflows the 16-bit block length.
pub fn encode_message(registry: &CategoryRegistry, records: &[Record]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        let mut body = Vec::new();
        record.encode(registry, &mut body)?;
        let total = body.len() + RecordHeader::LEN;
        if total > u16::MAX as usize {
            return Err(Error::InvalidEncodingValue {
                field: format!("CAT{:03} record", record.category),
                reason: format!("encoded block of {total} bytes exceeds the length field"),
            });
        }
        RecordHeader {
            category: record.category,
            len: total as u16,
        }
        .encode_into(&mut out);
        out.extend_from_slice(&body);
    }
    Ok(out)
}

struct RecordReaderIter<'a, R>
where
    R: Read + Send,
{
    registry: &'a CategoryRegistry,
    reader: R,
}

impl<R> Iterator for RecordReaderIter<'_, R>
where
    R: Read + Send,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut header_bytes = [0u8; RecordHeader::LEN];
        match self.reader.read_exact(&mut header_bytes) {
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return None,
            Err(err) => return Some(Err(err.into())),
            Ok(()) => {}
        }
        // cannot fail, read_exact filled all LEN bytes
        let header = RecordHeader::decode(&header_bytes)?;
        let declared = header.len as usize;
        if declared < RecordHeader::LEN {
            return Some(Err(Error::TruncatedField {
                field: format!("CAT{:03} record", header.category),
                needed: RecordHeader::LEN,
                remaining: declared,
            }));
        }
        let mut body = vec![0u8; declared - RecordHeader::LEN];
        if let Err(err) = self.reader.read_exact(&mut body) {
            // mid-record end of stream is an error, unlike a clean boundary
            return Some(Err(err.into()));
        }
        match Record::decode(self.registry, header.category, &body) {
            Ok((record, _)) => Some(Ok(record)),
            Err(err) => Some(Err(err)),
        }
    }
}

/// Decode a stream of record blocks from `reader`.
///
/// The stream ends cleanly when `reader` is exhausted at a block boundary.
/// A record that fails to decode yields an `Err` but leaves the reader at
/// the next block, so iteration can continue past bad records.
///
/// # Errors
/// Each item is [`Error::Io`] if the stream ends mid-block or reading
/// fails, otherwise whatever [`Record::decode`] reports for that block.
pub fn read_records<'a, R>(
    registry: &'a CategoryRegistry,
    reader: R,
) -> impl Iterator<Item = Result<Record>> + 'a
where
    R: Read + Send + 'a,
{
    RecordReaderIter { registry, reader }
}
