//! The closed table of dispatchable header fields.
//!
//! Machine-code objects carry a small header ahead of their instruction
//! bytes: the map word identifying the object's type, then the
//! protected-pointer back-references into the trusted space. Offset-based
//! writes are only ever legal against this closed set; anything else is a
//! logic error in the caller. The table is validated once (no overlap,
//! natural alignment) on first use and looked up by offset afterwards, so no
//! call site re-derives field offsets.

use std::mem::size_of;
use std::sync::Once;

use crate::slots::PROTECTED_POINTER_BYTES;

/// Describes one fixed-offset field in a machine-code object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderField {
    /// Human-readable field name, used in diagnostics.
    pub name: &'static str,
    /// Byte offset of the field from the start of the allocation.
    pub offset: usize,
    /// Width of the field in bytes.
    pub width: usize,
    /// Whether the field holds a compressed trusted-space pointer.
    pub protected: bool,
}

/// Offset of the map word, the type descriptor concurrent collectors read
/// without synchronization. Writes there always take the relaxed-atomic path.
pub const MAP_WORD_OFFSET: usize = 0;

/// The map word itself.
pub const MAP_WORD: HeaderField = HeaderField {
    name: "map-word",
    offset: MAP_WORD_OFFSET,
    width: size_of::<usize>(),
    protected: false,
};

/// Protected pointer from an instruction stream back to its code object.
pub const CODE_POINTER: HeaderField = HeaderField {
    name: "code-pointer",
    offset: size_of::<usize>(),
    width: PROTECTED_POINTER_BYTES,
    protected: true,
};

/// Protected pointer from an instruction stream to its relocation info.
pub const RELOCATION_INFO: HeaderField = HeaderField {
    name: "relocation-info",
    offset: size_of::<usize>() + PROTECTED_POINTER_BYTES,
    width: PROTECTED_POINTER_BYTES,
    protected: true,
};

/// Every field an instruction-stream header defines, in layout order.
pub const INSTRUCTION_STREAM_FIELDS: [HeaderField; 3] =
    [MAP_WORD, CODE_POINTER, RELOCATION_INFO];

static VALIDATE: Once = Once::new();

/// Checks the table once: fields must be laid out in order, must not
/// overlap, and the ordered-store fields must sit at naturally aligned
/// offsets.
fn validate_table() {
    VALIDATE.call_once(|| {
        let mut end = 0;
        for field in &INSTRUCTION_STREAM_FIELDS {
            assert!(field.offset >= end, "header fields overlap: {}", field.name);
            assert!(
                field.offset % field.width == 0,
                "header field {} is not naturally aligned",
                field.name
            );
            end = field.offset + field.width;
        }
    });
}

/// Resolves an offset against the closed set of protected-pointer fields.
///
/// Returns the descriptor for the code-pointer or relocation-info field, the
/// only two offsets an offset-dispatched write may target; any other offset
/// yields `None` and the caller treats it as a contract violation.
pub fn protected_field_at(offset: usize) -> Option<&'static HeaderField> {
    validate_table();
    INSTRUCTION_STREAM_FIELDS
        .iter()
        .find(|field| field.protected && field.offset == offset)
}
