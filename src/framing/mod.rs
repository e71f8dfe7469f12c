//! Message framing for small-MTU links.
//!
//! Encoded messages routinely dwarf the payload of a single frame on the
//! links this crate targets; a classic CAN frame carries 8 bytes. The
//! framing layer splits a message into indexed fragments that each fit one
//! frame and reassembles arriving fragments, possibly out of order and
//! interleaved across messages, back into the original bytes.
//!
//! Fragment wire format, one byte of header per frame:
//!
//! ```text
//! +---------------+----------//----------+
//! | L | index (7) |       payload        |
//! +---------------+----------//----------+
//!
//! L        : set on the final fragment of a message
//! index    : zero-based position within the message, 0..=127
//! payload  : up to the frame capacity minus the header byte
//! ```

mod reassembly;

pub use reassembly::{spawn_sweeper, Reassembler, SweeperHandle};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{Error, Result};

/// Identifies which message a fragment belongs to within one transport,
/// derived by the caller from transport addressing (e.g. a CAN arbitration
/// id). It is not carried in the fragment header.
pub type GroupId = u32;

/// Frame capacity selector for the supported link flavors.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameMode {
    /// Classic 8-byte frames: a header byte plus 7 payload bytes.
    Classic,
    /// Large frames (e.g. CAN FD): a header byte plus up to 63 payload
    /// bytes.
    Fd,
}

impl FrameMode {
    /// Fragment payload capacity for this mode.
    #[must_use]
    pub const fn max_payload(self) -> usize {
        match self {
            FrameMode::Classic => 7,
            FrameMode::Fd => 63,
        }
    }
}

/// One transport frame of a fragmented message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Group this fragment belongs to.
    pub group: GroupId,
    /// Zero-based position within the group.
    pub index: u8,
    /// Set on the single highest-index fragment of the group.
    pub last: bool,
    pub payload: Vec<u8>,
}

impl Fragment {
    /// Highest index the 7-bit header field can carry.
    pub const MAX_INDEX: u8 = 0x7f;
    /// Greatest number of fragments one message can span.
    pub const MAX_FRAGMENTS: usize = Self::MAX_INDEX as usize + 1;

    /// Decode a received frame belonging to `group`. Returns `None` if
    /// `dat` is empty, since a frame without its header byte says nothing.
    #[must_use]
    pub fn decode(group: GroupId, dat: &[u8]) -> Option<Self> {
        let (&header, payload) = dat.split_first()?;
        Some(Fragment {
            group,
            index: header & Self::MAX_INDEX,
            last: header & 0x80 != 0,
            payload: payload.to_vec(),
        })
    }

    /// Encode header and payload into a frame buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.index <= Self::MAX_INDEX);
        let mut out = Vec::with_capacity(1 + self.payload.len());
        out.push((u8::from(self.last) << 7) | (self.index & Self::MAX_INDEX));
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Number of fragments a message of `len` bytes spans at `max_payload`
/// bytes per frame. An empty message still takes one fragment, the one
/// announcing the end of the group.
///
/// # Panics
/// If `max_payload` is zero.
#[must_use]
pub fn fragment_count(len: usize, max_payload: usize) -> usize {
    assert!(max_payload > 0, "fragment payload capacity must be non-zero");
    len.div_ceil(max_payload).max(1)
}

/// Split an encoded message into indexed fragments for `group`.
///
/// Every fragment except the last carries exactly `max_payload` bytes; the
/// last carries the remainder and has its last flag set.
///
/// # Errors
/// [`Error::MessageTooLarge`] if the message spans more than
/// [`Fragment::MAX_FRAGMENTS`] frames.
///
/// # Panics
/// If `max_payload` is zero.
///
/// # Examples
/// ```
/// use asterix::framing::{fragment, FrameMode};
///
/// let message = vec![0xa5; 100];
/// let fragments = fragment(9, &message, FrameMode::Classic.max_payload()).unwrap();
/// assert_eq!(fragments.len(), 15);
/// assert!(fragments[14].last);
/// assert_eq!(fragments[14].payload.len(), 2);
/// ```
pub fn fragment(group: GroupId, data: &[u8], max_payload: usize) -> Result<Vec<Fragment>> {
    let count = fragment_count(data.len(), max_payload);
    if count > Fragment::MAX_FRAGMENTS {
        return Err(Error::MessageTooLarge {
            len: data.len(),
            max_payload,
            frames: count,
            limit: Fragment::MAX_FRAGMENTS,
        });
    }
    let mut fragments: Vec<Fragment> = data
        .chunks(max_payload)
        .enumerate()
        .map(|(index, payload)| Fragment {
            group,
            index: index as u8,
            last: index + 1 == count,
            payload: payload.to_vec(),
        })
        .collect();
    if fragments.is_empty() {
        fragments.push(Fragment {
            group,
            index: 0,
            last: true,
            payload: Vec::new(),
        });
    }
    trace!(group, len = data.len(), max_payload, count, "fragmented message");
    Ok(fragments)
}
