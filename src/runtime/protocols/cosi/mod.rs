//! Collective signing (CoSi): a four-phase, tree-shaped protocol that
//! produces one aggregate Schnorr signature over a message, with a
//! round of work linear in tree depth rather than roster size.
//!
//! Phases, each a flood down the tree followed by an aggregation back
//! up it:
//!
//! 1. **Announcement** — the root floods the message to sign down to
//!    every node.
//! 2. **Commitment** — each node picks a fresh random commitment,
//!    aggregates it with its subtree's commitments, and sends the
//!    aggregate to its parent. The root ends up with the full tree's
//!    aggregate commitment.
//! 3. **Challenge** — the root derives the Fiat-Shamir challenge from
//!    the aggregate commitment and floods it back down.
//! 4. **Response** — each node computes its own response, aggregates
//!    it with its subtree's responses, and sends the aggregate to its
//!    parent. The root assembles the final signature.
//!
//! Each node drives its own round as a single sequential task; the
//! commitment and response phases lean on
//! [`TreeNodeInstance::register_aggregate_channel`] for the "wait until
//! every child has reported" half of each phase, rather than counting
//! children in by hand.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::runtime::communication::channel::MessageRx;
use crate::runtime::communication::serialize::{self, WireType};
use crate::runtime::crypto::schnorr;
use crate::runtime::error::*;
use crate::runtime::instance::TreeNodeInstance;
use crate::runtime::protocol::ProtocolInstance;

#[derive(Clone, Serialize, Deserialize)]
struct Announcement {
    message: Vec<u8>,
}

impl WireType for Announcement {
    const NAME: &'static str = "cosi/Announcement";
}

#[derive(Clone, Serialize, Deserialize)]
struct CommitmentMsg {
    point: [u8; 32],
}

impl WireType for CommitmentMsg {
    const NAME: &'static str = "cosi/Commitment";
}

#[derive(Clone, Serialize, Deserialize)]
struct ChallengeMsg {
    challenge: [u8; 32],
}

impl WireType for ChallengeMsg {
    const NAME: &'static str = "cosi/Challenge";
}

#[derive(Clone, Serialize, Deserialize)]
struct ResponseMsg {
    response: [u8; 32],
}

impl WireType for ResponseMsg {
    const NAME: &'static str = "cosi/Response";
}

/// Registers this protocol's wire types. Called once from
/// [`crate::runtime::communication::serialize::init_registry`].
pub fn register_types() {
    serialize::register::<Announcement>();
    serialize::register::<CommitmentMsg>();
    serialize::register::<ChallengeMsg>();
    serialize::register::<ResponseMsg>();
}

/// One node's participation in a single collective-signing round.
///
/// Built with the full roster's Schnorr public keys so that the root —
/// and only the root — can derive the Fiat-Shamir challenge; every
/// other node only ever needs its own key pair and the challenge value
/// handed down to it.
pub struct Cosi {
    instance: TreeNodeInstance,
    key_pair: schnorr::KeyPair,
    public_keys: Vec<schnorr::PublicKey>,
    message: Vec<u8>,
    result_tx: Mutex<Option<oneshot::Sender<Result<schnorr::Signature>>>>,
    result_rx: Mutex<Option<oneshot::Receiver<Result<schnorr::Signature>>>>,
}

impl Cosi {
    /// Builds a new CoSi run. `public_keys` only matters at the root,
    /// which needs the full set to derive the aggregate public key the
    /// challenge is bound to; non-root nodes may pass an empty vec, as
    /// may `message` — it reaches them over the wire from the root.
    pub fn new(instance: TreeNodeInstance, key_pair: schnorr::KeyPair, public_keys: Vec<schnorr::PublicKey>, message: Vec<u8>) -> Self {
        let (result_tx, result_rx) = oneshot::channel();
        Self {
            instance,
            key_pair,
            public_keys,
            message,
            result_tx: Mutex::new(Some(result_tx)),
            result_rx: Mutex::new(Some(result_rx)),
        }
    }

    /// Blocks the caller (the root, in practice) until the collective
    /// signature is ready. Can only be awaited once.
    pub async fn signature(&self) -> Result<schnorr::Signature> {
        let rx = self.result_rx.lock().take().ok_or(()).simple(ErrorKind::ProtocolCosi)?;
        rx.await.simple(ErrorKind::ProtocolCosi)?
    }

    fn finish(&self, result: Result<schnorr::Signature>) {
        if let Some(tx) = self.result_tx.lock().take() {
            let _ = tx.send(result);
        }
    }

    /// Drives the whole round for this node, start to finish. Every
    /// node — root included — runs the same sequence; the only branch
    /// points are whether a phase's input comes over the wire or is
    /// derived locally (root), and whether its output goes to a parent
    /// or finishes the round (root again).
    async fn run(
        self: Arc<Self>,
        mut announcement_rx: MessageRx<Announcement>,
        mut commitment_rx: MessageRx<Vec<CommitmentMsg>>,
        mut challenge_rx: MessageRx<ChallengeMsg>,
        mut response_rx: MessageRx<Vec<ResponseMsg>>,
    ) {
        let message = if self.instance.is_root() {
            self.message.clone()
        } else {
            match announcement_rx.recv().await {
                Some(a) => a.message,
                None => return,
            }
        };
        let _ = self.instance.send_to_children(&Announcement { message: message.clone() });

        let own_commitment = self.key_pair.commit();
        let own_point = own_commitment.point();
        let children = self.instance.children().len();

        let agg_commitment = if children == 0 {
            own_point
        } else {
            let batch = match commitment_rx.recv().await {
                Some(batch) => batch,
                None => return,
            };
            let mut points = Vec::with_capacity(batch.len() + 1);
            points.push(own_point);
            for msg in &batch {
                match schnorr::CommitmentPoint::from_bytes(&msg.point) {
                    Ok(point) => points.push(point),
                    Err(_) => return,
                }
            }
            schnorr::CommitmentPoint::aggregate(points.iter())
        };

        let challenge = if self.instance.is_root() {
            let agg_public = schnorr::PublicKey::aggregate(self.public_keys.iter());
            schnorr::Challenge::derive(&agg_commitment, &agg_public, &message)
        } else {
            let _ = self.instance.send_to_parent(&CommitmentMsg { point: agg_commitment.to_bytes() });
            match challenge_rx.recv().await {
                Some(msg) => match schnorr::Challenge::from_bytes(&msg.challenge) {
                    Ok(c) => c,
                    Err(_) => return,
                },
                None => return,
            }
        };
        let _ = self.instance.send_to_children(&ChallengeMsg { challenge: challenge.to_bytes() });

        let own_response = self.key_pair.respond(&own_commitment, challenge);

        let agg_response = if children == 0 {
            own_response
        } else {
            let batch = match response_rx.recv().await {
                Some(batch) => batch,
                None => return,
            };
            let mut responses = Vec::with_capacity(batch.len() + 1);
            responses.push(own_response);
            for msg in &batch {
                match schnorr::Response::from_bytes(&msg.response) {
                    Ok(r) => responses.push(r),
                    Err(_) => return,
                }
            }
            schnorr::Response::aggregate(responses.iter())
        };

        if self.instance.is_root() {
            self.finish(Ok(schnorr::Signature { challenge, response: agg_response }));
        } else {
            let _ = self.instance.send_to_parent(&ResponseMsg { response: agg_response.to_bytes() });
        }
    }
}

impl ProtocolInstance for Cosi {
    fn instance(&self) -> &TreeNodeInstance {
        &self.instance
    }

    fn start(self: Arc<Self>) {
        let announcement_rx = self.instance.register_channel::<Announcement>();
        let commitment_rx = self.instance.register_aggregate_channel::<CommitmentMsg>();
        let challenge_rx = self.instance.register_channel::<ChallengeMsg>();
        let response_rx = self.instance.register_aggregate_channel::<ResponseMsg>();

        crate::runtime::async_exec::spawn(self.run(announcement_rx, commitment_rx, challenge_rx, response_rx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_points_roundtrip_through_bytes() {
        let key = schnorr::KeyPair::random();
        let commitment = key.commit();
        let point = commitment.point();
        let decoded = schnorr::CommitmentPoint::from_bytes(&point.to_bytes()).unwrap();
        assert_eq!(decoded.to_bytes(), point.to_bytes());
    }

    #[test]
    fn register_types_is_idempotent() {
        register_types();
        register_types();
    }
}
