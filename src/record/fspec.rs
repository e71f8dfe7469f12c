//! Field specification (FSPEC) presence bitmap.
//!
//! Every record opens with a variable-length bitmap announcing which of the
//! category's declared items follow. Each octet carries seven presence
//! bits, most significant bit first, and a low-order extension bit that is
//! set when another bitmap octet follows.

use tracing::trace;

use crate::{Error, Result};

/// Presence bits carried per bitmap octet.
const BITS_PER_OCTET: usize = 7;

/// Extension bit marking a continued bitmap.
const FX: u8 = 0x01;

/// Decode the FSPEC at the start of `buf` for a layout declaring
/// `num_fields` items. `what` labels errors, e.g. `CAT048` or a compound
/// item identifier.
///
/// Returns one presence flag per declared item plus the number of octets
/// consumed. Extension octets whose presence bits are all clear are
/// tolerated; minimality is an encoding property only.
///
/// # Errors
/// [`Error::MalformedFspec`] if the bitmap does not terminate within `buf`
/// or a presence bit addresses an item position beyond `num_fields`.
pub fn decode(buf: &[u8], num_fields: usize, what: &str) -> Result<(Vec<bool>, usize)> {
    let mut present = vec![false; num_fields];
    let mut consumed = 0;
    loop {
        let Some(&octet) = buf.get(consumed) else {
            return Err(Error::MalformedFspec {
                field: what.to_string(),
                reason: format!("bitmap does not terminate within {} bytes", buf.len()),
            });
        };
        for bit in 0..BITS_PER_OCTET {
            if octet & (0x80 >> bit) == 0 {
                continue;
            }
            let idx = consumed * BITS_PER_OCTET + bit;
            if idx >= num_fields {
                return Err(Error::MalformedFspec {
                    field: what.to_string(),
                    reason: format!(
                        "presence bit for item {} but only {num_fields} declared",
                        idx + 1
                    ),
                });
            }
            present[idx] = true;
        }
        consumed += 1;
        if octet & FX == 0 {
            break;
        }
    }
    trace!(what, octets = consumed, "decoded fspec");
    Ok((present, consumed))
}

/// Append the minimum bitmap representing `present` to `out`.
///
/// The extension bit is set on every octet except the last. An all-absent
/// set still emits a single zero octet so a record is never bitmap-less.
pub fn encode(present: &[bool], out: &mut Vec<u8>) {
    let octets = present
        .iter()
        .rposition(|&p| p)
        .map_or(1, |hi| hi / BITS_PER_OCTET + 1);
    for i in 0..octets {
        let mut octet = 0u8;
        for bit in 0..BITS_PER_OCTET {
            if present.get(i * BITS_PER_OCTET + bit).copied().unwrap_or(false) {
                octet |= 0x80 >> bit;
            }
        }
        if i + 1 < octets {
            octet |= FX;
        }
        out.push(octet);
    }
}
