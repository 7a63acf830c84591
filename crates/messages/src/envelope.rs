//! The signed consensus envelope.

use crate::{MessageType, Payload};
use palisade_types::{
    consensus_message, KeyPair, NodeId, SequenceNumber, Signature, SignatureVerifier, ViewNumber,
};
use serde::{Deserialize, Serialize};

/// Wire envelope exchanged between cluster members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusMessage {
    pub message_type: MessageType,
    pub sender_id: NodeId,
    pub view_number: ViewNumber,
    pub sequence_number: SequenceNumber,
    pub payload: Payload,
    /// Milliseconds since the Unix epoch, as reported by the sender.
    pub timestamp: u64,
    pub signature: Signature,
}

impl ConsensusMessage {
    /// Build and sign an envelope.
    pub fn signed(
        key: &KeyPair,
        sender_id: NodeId,
        view_number: ViewNumber,
        sequence_number: SequenceNumber,
        payload: Payload,
        timestamp: u64,
    ) -> Self {
        let mut message = Self {
            message_type: payload.message_type(),
            sender_id,
            view_number,
            sequence_number,
            payload,
            timestamp,
            signature: Signature::empty(),
        };
        message.signature = key.sign(&message.signing_message());
        message
    }

    /// The bytes covered by the signature.
    pub fn signing_message(&self) -> Vec<u8> {
        consensus_message(
            self.message_type.tag(),
            &self.sender_id,
            self.view_number,
            self.sequence_number,
            &self.payload.digest(),
            self.timestamp,
        )
    }

    /// Check that the declared type matches the payload.
    pub fn is_well_formed(&self) -> bool {
        self.message_type == self.payload.message_type()
    }

    /// Check shape and signature.
    pub fn verify(&self, verifier: &dyn SignatureVerifier) -> bool {
        self.is_well_formed()
            && !self.signature.is_empty()
            && verifier.verify(&self.sender_id, &self.signing_message(), &self.signature)
    }
}
