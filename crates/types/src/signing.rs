//! Domain-separated signing for consensus envelopes.
//!
//! Every signed message is prefixed with a domain tag so a signature produced
//! for one purpose can never be replayed as another.
//!
//! | Tag | Purpose |
//! |-----|---------|
//! | `palisade/consensus:` | Consensus envelopes (all message types) |

use crate::{Hash, NodeId, SequenceNumber, ViewNumber};

/// Domain tag for consensus envelopes.
///
/// Format: `palisade/consensus:` || type_tag || len(sender) || sender || view || sequence || payload_digest || timestamp
pub const DOMAIN_CONSENSUS_MESSAGE: &[u8] = b"palisade/consensus:";

/// Build the signing message for a consensus envelope.
///
/// The payload is covered through its digest so the signing message stays
/// small regardless of proposal size.
pub fn consensus_message(
    type_tag: u8,
    sender: &NodeId,
    view: ViewNumber,
    sequence: SequenceNumber,
    payload_digest: &Hash,
    timestamp_ms: u64,
) -> Vec<u8> {
    let sender_bytes = sender.as_bytes();
    let mut message =
        Vec::with_capacity(DOMAIN_CONSENSUS_MESSAGE.len() + 1 + 4 + sender_bytes.len() + 56);
    message.extend_from_slice(DOMAIN_CONSENSUS_MESSAGE);
    message.push(type_tag);
    message.extend_from_slice(&(sender_bytes.len() as u32).to_le_bytes());
    message.extend_from_slice(sender_bytes);
    message.extend_from_slice(&view.0.to_le_bytes());
    message.extend_from_slice(&sequence.0.to_le_bytes());
    message.extend_from_slice(payload_digest.as_bytes());
    message.extend_from_slice(&timestamp_ms.to_le_bytes());
    message
}
