//! Data item codec.
//!
//! Dispatches on [`FieldKind`] to decode one data item from a byte cursor
//! or append its encoded form to an output buffer. Decoding always reports
//! how many bytes it consumed so the record codec can advance a single
//! cursor across consecutive items.

use serde::{Deserialize, Serialize};

use super::fspec;
use crate::uap::{FieldKind, FieldSpec};
use crate::{Error, Result};

/// A decoded data item value.
///
/// The codec preserves structure (repetition, compound subfields) but does
/// not interpret content; leaf payloads stay as raw bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Raw payload of a fixed, extended, variable, or explicit item.
    Bytes(Vec<u8>),
    /// Sub-items of a repetitive item, in wire order.
    Items(Vec<Value>),
    /// Present subfields of a compound item, in declaration order.
    Group(Vec<(String, Value)>),
}

impl Value {
    /// Raw payload bytes, if this is a byte-shaped value.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(dat) => Some(dat),
            _ => None,
        }
    }
}

/// Decode one data item according to `spec`, returning the value and the
/// number of bytes consumed.
///
/// # Errors
/// [`Error::TruncatedField`] if `buf` ends before the item does,
/// [`Error::MalformedFspec`] if a compound item's subfield bitmap is bad, or
/// [`Error::ExcessPayload`] if an explicit item's payload outruns its
/// registered sub-interpretation.
///
/// # Panics
/// If `spec` declares an extended item with zero group length;
/// [`CategorySpec::validate`](crate::uap::CategorySpec::validate) rejects
/// such profiles up front.
pub fn decode(spec: &FieldSpec, buf: &[u8]) -> Result<(Value, usize)> {
    match &spec.kind {
        FieldKind::Fixed { len } => {
            let dat = take(buf, *len, spec)?;
            Ok((Value::Bytes(dat.to_vec()), *len))
        }
        FieldKind::Extended { group_len } => decode_extended(spec, *group_len, buf),
        FieldKind::Variable => decode_variable(spec, buf),
        FieldKind::Repetitive { item } => decode_repetitive(spec, item, buf),
        FieldKind::Compound { parts } => decode_compound(spec, parts, buf),
        FieldKind::Explicit { inner } => decode_explicit(spec, inner.as_deref(), buf),
    }
}

fn take<'a>(buf: &'a [u8], len: usize, spec: &FieldSpec) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(Error::TruncatedField {
            field: spec.id.clone(),
            needed: len,
            remaining: buf.len(),
        });
    }
    Ok(&buf[..len])
}

fn decode_extended(spec: &FieldSpec, group_len: usize, buf: &[u8]) -> Result<(Value, usize)> {
    assert!(group_len > 0, "extended item {} has zero group length", spec.id);
    let mut consumed = 0;
    loop {
        let group = take(&buf[consumed..], group_len, spec)?;
        consumed += group_len;
        // low-order bit of the group's final byte chains to the next group
        if group[group_len - 1] & 0x01 == 0 {
            break;
        }
    }
    Ok((Value::Bytes(buf[..consumed].to_vec()), consumed))
}

fn decode_variable(spec: &FieldSpec, buf: &[u8]) -> Result<(Value, usize)> {
    let header = take(buf, 1, spec)?;
    let len = header[0] as usize;
    let dat = take(&buf[1..], len, spec)?;
    Ok((Value::Bytes(dat.to_vec()), 1 + len))
}

fn decode_repetitive(spec: &FieldSpec, item: &FieldSpec, buf: &[u8]) -> Result<(Value, usize)> {
    let header = take(buf, 1, spec)?;
    let count = header[0] as usize;
    let mut consumed = 1;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let (value, used) = decode(item, &buf[consumed..])?;
        consumed += used;
        items.push(value);
    }
    Ok((Value::Items(items), consumed))
}

fn decode_compound(spec: &FieldSpec, parts: &[FieldSpec], buf: &[u8]) -> Result<(Value, usize)> {
    let (present, mut consumed) = fspec::decode(buf, parts.len(), &spec.id)?;
    let mut group = Vec::new();
    for (part, present) in parts.iter().zip(&present) {
        if !present {
            continue;
        }
        let (value, used) = decode(part, &buf[consumed..])?;
        consumed += used;
        group.push((part.id.clone(), value));
    }
    Ok((Value::Group(group), consumed))
}

fn decode_explicit(
    spec: &FieldSpec,
    inner: Option<&FieldSpec>,
    buf: &[u8],
) -> Result<(Value, usize)> {
    let header = take(buf, 1, spec)?;
    let total = header[0] as usize;
    if total == 0 {
        // the length byte counts itself, so zero cannot hold even the header
        return Err(Error::TruncatedField {
            field: spec.id.clone(),
            needed: 1,
            remaining: 0,
        });
    }
    let payload = take(&buf[1..], total - 1, spec)?;
    let value = match inner {
        Some(inner) => {
            // the sub-interpretation must consume the payload exactly
            let (value, used) = decode(inner, payload)?;
            if used != payload.len() {
                return Err(Error::ExcessPayload {
                    field: spec.id.clone(),
                    declared: payload.len(),
                    used,
                });
            }
            value
        }
        None => Value::Bytes(payload.to_vec()),
    };
    Ok((value, total))
}

/// Append the encoded form of `value` for `spec` to `out`.
///
/// # Errors
/// [`Error::InvalidEncodingValue`] if `value` does not satisfy the shape
/// `spec` declares.
///
/// # Panics
/// If `spec` declares an extended item with zero group length;
/// [`CategorySpec::validate`](crate::uap::CategorySpec::validate) rejects
/// such profiles up front.
pub fn encode(spec: &FieldSpec, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match &spec.kind {
        FieldKind::Fixed { len } => {
            let dat = expect_bytes(spec, value)?;
            if dat.len() != *len {
                return Err(invalid(
                    spec,
                    format!("fixed item takes {len} bytes, got {}", dat.len()),
                ));
            }
            out.extend_from_slice(dat);
            Ok(())
        }
        FieldKind::Extended { group_len } => encode_extended(spec, *group_len, value, out),
        FieldKind::Variable => {
            let dat = expect_bytes(spec, value)?;
            if dat.len() > u8::MAX as usize {
                return Err(invalid(
                    spec,
                    format!("payload of {} bytes exceeds the length byte", dat.len()),
                ));
            }
            out.push(dat.len() as u8);
            out.extend_from_slice(dat);
            Ok(())
        }
        FieldKind::Repetitive { item } => encode_repetitive(spec, item, value, out),
        FieldKind::Compound { parts } => encode_compound(spec, parts, value, out),
        FieldKind::Explicit { inner } => encode_explicit(spec, inner.as_deref(), value, out),
    }
}

fn encode_extended(
    spec: &FieldSpec,
    group_len: usize,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<()> {
    assert!(group_len > 0, "extended item {} has zero group length", spec.id);
    let dat = expect_bytes(spec, value)?;
    if dat.is_empty() || dat.len() % group_len != 0 {
        return Err(invalid(
            spec,
            format!(
                "extended item takes a non-empty multiple of {group_len} bytes, got {}",
                dat.len()
            ),
        ));
    }
    let groups = dat.len() / group_len;
    for g in 0..groups {
        let fx = dat[g * group_len + group_len - 1] & 0x01 != 0;
        if fx != (g + 1 < groups) {
            return Err(invalid(spec, format!("continuation bit wrong in group {}", g + 1)));
        }
    }
    out.extend_from_slice(dat);
    Ok(())
}

fn encode_repetitive(
    spec: &FieldSpec,
    item: &FieldSpec,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<()> {
    let Value::Items(items) = value else {
        return Err(invalid(spec, "expected a sub-item list"));
    };
    if items.len() > u8::MAX as usize {
        return Err(invalid(
            spec,
            format!("repetition count {} exceeds the count byte", items.len()),
        ));
    }
    out.push(items.len() as u8);
    for item_value in items {
        encode(item, item_value, out)?;
    }
    Ok(())
}

fn encode_compound(
    spec: &FieldSpec,
    parts: &[FieldSpec],
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<()> {
    let Value::Group(group) = value else {
        return Err(invalid(spec, "expected a subfield group"));
    };
    let mut present = vec![false; parts.len()];
    for (id, _) in group {
        let Some(idx) = parts.iter().position(|p| p.id == *id) else {
            return Err(invalid(spec, format!("unknown subfield {id}")));
        };
        if present[idx] {
            return Err(invalid(spec, format!("duplicate subfield {id}")));
        }
        present[idx] = true;
    }
    fspec::encode(&present, out);
    for part in parts {
        if let Some((_, part_value)) = group.iter().find(|(id, _)| *id == part.id) {
            encode(part, part_value, out)?;
        }
    }
    Ok(())
}

fn encode_explicit(
    spec: &FieldSpec,
    inner: Option<&FieldSpec>,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<()> {
    // a registered sub-interpretation owns the payload framing; raw bytes
    // pass through only when none is declared
    let body = match inner {
        Some(inner) => {
            let mut body = Vec::new();
            encode(inner, value, &mut body)?;
            body
        }
        None => expect_bytes(spec, value)?.to_vec(),
    };
    let total = body.len() + 1;
    if total > u8::MAX as usize {
        return Err(invalid(
            spec,
            format!("explicit item of {total} bytes exceeds the length byte"),
        ));
    }
    out.push(total as u8);
    out.extend_from_slice(&body);
    Ok(())
}

fn expect_bytes<'a>(spec: &FieldSpec, value: &'a Value) -> Result<&'a [u8]> {
    value.as_bytes().ok_or_else(|| invalid(spec, "expected raw bytes"))
}

fn invalid(spec: &FieldSpec, reason: impl Into<String>) -> Error {
    Error::InvalidEncodingValue {
        field: spec.id.clone(),
        reason: reason.into(),
    }
}
