use crate::framing::GroupId;
use crate::uap::Category;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No UAP is registered for the record's category number.
    #[error("no UAP registered for category {0:03}")]
    UnknownCategory(Category),

    /// The presence bitmap is inconsistent with the declared field layout.
    #[error("malformed FSPEC in {field}: {reason}")]
    MalformedFspec { field: String, reason: String },

    /// A declared or implied length exceeds the bytes remaining.
    #[error("{field}: need {needed} bytes, {remaining} remain")]
    TruncatedField {
        field: String,
        needed: usize,
        remaining: usize,
    },

    /// An explicit item's declared payload is longer than its registered
    /// sub-interpretation consumes.
    #[error("{field}: sub-interpretation used {used} of {declared} payload bytes")]
    ExcessPayload {
        field: String,
        declared: usize,
        used: usize,
    },

    /// The message cannot be represented within the fragment index space.
    #[error(
        "{len}-byte message needs {frames} frames of {max_payload} payload bytes, limit {limit}"
    )]
    MessageTooLarge {
        len: usize,
        max_payload: usize,
        frames: usize,
        limit: usize,
    },

    /// A value to encode violates its field shape.
    #[error("cannot encode {field}: {reason}")]
    InvalidEncodingValue { field: String, reason: String },

    /// A fragment contradicts its group's established fragment count.
    #[error("fragment index {index} outside group {group} total of {total}")]
    MalformedFragment {
        group: GroupId,
        index: u8,
        total: usize,
    },

    /// A category spec fails structural validation.
    #[error("invalid spec for category {category:03}: {reason}")]
    InvalidSpec { category: Category, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
