//! OP_MSG body extraction.
//!
//! ```text
//! | header (16) | flagBits (4) | kind (1) | section payload ... | [checksum (4)]
//!                               ^ offset 20
//! ```
//! Kind 0 is a single BSON body document: the command itself.

use bson::Document;

use super::header::{MessageHeader, OpCode, HEADER_LEN};
use super::DecodeError;

const FLAGS_LEN: usize = 4;
const SECTION_KIND_OFFSET: usize = HEADER_LEN + FLAGS_LEN;
const SECTION_KIND_BODY: u8 = 0;

/// Decode the command document of an OP_MSG message.
///
/// `Ok(None)` for any other opcode or when the first section is not a body
/// document. Decoding never reads past `header.message_length`.
pub fn extract_command_section(
    message: &[u8],
    header: &MessageHeader,
) -> Result<Option<Document>, DecodeError> {
    if header.op_code() != OpCode::Msg {
        return Ok(None);
    }

    let declared = usize::try_from(header.message_length).unwrap_or(0);
    let message = &message[..declared.min(message.len())];

    let Some(&kind) = message.get(SECTION_KIND_OFFSET) else {
        return Err(DecodeError::Truncated {
            needed: SECTION_KIND_OFFSET + 1,
            available: message.len(),
        });
    };

    if kind != SECTION_KIND_BODY {
        return Ok(None);
    }

    let document = Document::from_reader(&message[SECTION_KIND_OFFSET + 1..])?;
    Ok(Some(document))
}
