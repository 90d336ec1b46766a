//! S2 SPAN/MPAN nonce progression and CCM frame protection.
//!
//! Both peers seed a shared nonce generator from the entropy inputs
//! exchanged during SPAN establishment; every protected frame consumes the
//! next 13-byte nonce. The receiver tolerates a small number of missed
//! frames by trying a window of upcoming nonces and adopting the position
//! that verifies.

use std::collections::HashMap;
use std::fmt;

use zwave_crypto::{aes128_ccm_decrypt, aes128_ccm_encrypt, aes128_cmac, aes128_ctr_keystream, NetworkKeys};

use crate::cc::security_s2::S2Encap;
use crate::error::CCError;

/// Consecutive MAC failures after which the transaction is aborted.
pub const MAX_MAC_FAILURES: u8 = 3;

/// How many nonces ahead the receiver searches when frames were missed.
const NONCE_CATCH_UP_WINDOW: usize = 5;

/// Shared nonce generator state for one peer (or one multicast group).
#[derive(Clone, PartialEq, Eq)]
pub struct SpanState {
    key: [u8; 16],
    counter: [u8; 16],
}

impl SpanState {
    /// Seed the generator from both entropy inputs under the nonce key.
    pub fn instantiate(
        nonce_key: &[u8; 16],
        sender_ei: &[u8; 16],
        receiver_ei: &[u8; 16],
    ) -> Self {
        let mut seed_input = [0u8; 32];
        seed_input[..16].copy_from_slice(sender_ei);
        seed_input[16..].copy_from_slice(receiver_ei);
        SpanState {
            key: *nonce_key,
            counter: aes128_cmac(nonce_key, &seed_input),
        }
    }

    /// Draw the next 13-byte nonce and advance the state.
    pub fn next_nonce(&mut self) -> [u8; 13] {
        let keystream = aes128_ctr_keystream(&self.key, &self.counter, 16);
        increment_be(&mut self.counter);
        keystream[..13].try_into().expect("keystream is 16 bytes")
    }
}

fn increment_be(counter: &mut [u8; 16]) {
    for byte in counter.iter_mut().rev() {
        let (next, overflow) = byte.overflowing_add(1);
        *byte = next;
        if !overflow {
            break;
        }
    }
}

// The generator state derives from key material; never print it.
impl fmt::Debug for SpanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpanState(redacted)")
    }
}

/// What to do after a MAC failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncDecision {
    /// Request a NonceReport and retry.
    Resync,
    /// Too many consecutive failures; fail the transaction.
    Abort,
}

/// Per-driver S2 state: SPANs per node, MPANs per group, sequence counter.
pub struct S2Engine {
    keys: NetworkKeys,
    spans: HashMap<u8, SpanState>,
    mpans: HashMap<u8, SpanState>,
    seq: u8,
    mac_failures: HashMap<u8, u8>,
    /// Receiver entropy inputs we issued in NonceReports, waiting for the
    /// peer's SPAN extension.
    issued_receiver_ei: HashMap<u8, [u8; 16]>,
}

impl S2Engine {
    pub fn new(keys: NetworkKeys) -> Self {
        Self {
            keys,
            spans: HashMap::new(),
            mpans: HashMap::new(),
            seq: 0,
            mac_failures: HashMap::new(),
            issued_receiver_ei: HashMap::new(),
        }
    }

    /// Remember the entropy input sent to a peer in a NonceReport.
    pub fn note_issued_receiver_ei(&mut self, node_id: u8, receiver_ei: [u8; 16]) {
        self.issued_receiver_ei.insert(node_id, receiver_ei);
    }

    /// Consume the entropy input previously issued to a peer.
    pub fn take_issued_receiver_ei(&mut self, node_id: u8) -> Option<[u8; 16]> {
        self.issued_receiver_ei.remove(&node_id)
    }

    /// The next frame sequence number (wrapping).
    pub fn next_seq(&mut self) -> u8 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// (Re-)establish the SPAN for a node from fresh entropy inputs.
    pub fn establish_span(
        &mut self,
        node_id: u8,
        sender_ei: &[u8; 16],
        receiver_ei: &[u8; 16],
    ) {
        tracing::debug!(node_id, "SPAN established");
        self.spans.insert(
            node_id,
            SpanState::instantiate(&self.keys.nonce_key, sender_ei, receiver_ei),
        );
        self.mac_failures.remove(&node_id);
    }

    pub fn has_span(&self, node_id: u8) -> bool {
        self.spans.contains_key(&node_id)
    }

    /// Install a multicast group state.
    pub fn establish_mpan(&mut self, group_id: u8, state: SpanState) {
        self.mpans.insert(group_id, state);
    }

    /// The next multicast nonce for a group.
    pub fn next_mpan_nonce(&mut self, group_id: u8) -> Option<[u8; 13]> {
        self.mpans.get_mut(&group_id).map(SpanState::next_nonce)
    }

    /// Seal a serialized inner CC for singlecast transmission.
    pub fn encrypt(
        &mut self,
        node_id: u8,
        src: u8,
        dst: u8,
        home_id: u32,
        plaintext: &[u8],
    ) -> Result<S2Encap, CCError> {
        let seq = self.next_seq();
        let span = self
            .spans
            .get_mut(&node_id)
            .ok_or(CCError::SpanNotSynced(node_id))?;
        let nonce = span.next_nonce();
        let aad = s2_aad(src, dst, home_id, seq);
        let ciphertext = aes128_ccm_encrypt(&self.keys.enc_key, &nonce, &aad, plaintext);
        Ok(S2Encap {
            seq,
            extensions: Vec::new(),
            ciphertext,
        })
    }

    /// Open a received MessageEncap. On success the SPAN position is
    /// synchronized to the frame that verified.
    pub fn decrypt(
        &mut self,
        node_id: u8,
        src: u8,
        dst: u8,
        home_id: u32,
        encap: &S2Encap,
    ) -> Result<Vec<u8>, CCError> {
        let aad = s2_aad(src, dst, home_id, encap.seq);
        let span = self
            .spans
            .get_mut(&node_id)
            .ok_or(CCError::SpanNotSynced(node_id))?;

        let mut trial = span.clone();
        for skipped in 0..NONCE_CATCH_UP_WINDOW {
            let nonce = trial.next_nonce();
            if let Ok(plaintext) =
                aes128_ccm_decrypt(&self.keys.enc_key, &nonce, &aad, &encap.ciphertext)
            {
                if skipped > 0 {
                    tracing::debug!(node_id, skipped, "SPAN caught up after missed frames");
                }
                *span = trial;
                self.mac_failures.remove(&node_id);
                return Ok(plaintext);
            }
        }
        Err(CCError::MacFailed)
    }

    /// Record a MAC failure and decide between resync and abort.
    pub fn on_mac_failure(&mut self, node_id: u8) -> ResyncDecision {
        let count = self.mac_failures.entry(node_id).or_insert(0);
        *count += 1;
        if *count >= MAX_MAC_FAILURES {
            tracing::warn!(node_id, failures = *count, "aborting after repeated MAC failures");
            self.mac_failures.remove(&node_id);
            self.spans.remove(&node_id);
            ResyncDecision::Abort
        } else {
            tracing::debug!(node_id, failures = *count, "requesting SPAN resync");
            ResyncDecision::Resync
        }
    }
}

// Key-derived state stays out of logs; only the table sizes are shown.
impl fmt::Debug for S2Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S2Engine")
            .field("spans", &self.spans.len())
            .field("mpans", &self.mpans.len())
            .finish()
    }
}

/// Additional data binding the frame to its addressing.
fn s2_aad(src: u8, dst: u8, home_id: u32, seq: u8) -> [u8; 7] {
    let home = home_id.to_be_bytes();
    [src, dst, home[0], home[1], home[2], home[3], seq]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_pair() -> (S2Engine, S2Engine) {
        let keys = NetworkKeys::derive(&[0x42; 16]);
        let mut a = S2Engine::new(keys);
        let mut b = S2Engine::new(keys);
        let sender_ei = [0x01; 16];
        let receiver_ei = [0x02; 16];
        // Node 1 talks to node 5; each side keys the SPAN by its peer.
        a.establish_span(5, &sender_ei, &receiver_ei);
        b.establish_span(1, &sender_ei, &receiver_ei);
        (a, b)
    }

    const HOME_ID: u32 = 0xC951_AA20;

    #[test]
    fn span_nonces_agree() {
        let keys = NetworkKeys::derive(&[0x42; 16]);
        let mut a = SpanState::instantiate(&keys.nonce_key, &[0x01; 16], &[0x02; 16]);
        let mut b = SpanState::instantiate(&keys.nonce_key, &[0x01; 16], &[0x02; 16]);
        for _ in 0..10 {
            assert_eq!(a.next_nonce(), b.next_nonce());
        }
    }

    #[test]
    fn span_entropy_separates() {
        let keys = NetworkKeys::derive(&[0x42; 16]);
        let mut a = SpanState::instantiate(&keys.nonce_key, &[0x01; 16], &[0x02; 16]);
        let mut b = SpanState::instantiate(&keys.nonce_key, &[0x01; 16], &[0x03; 16]);
        assert_ne!(a.next_nonce(), b.next_nonce());
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let (mut a, mut b) = engine_pair();
        let encap = a.encrypt(5, 1, 5, HOME_ID, &[0x26, 0x01, 80]).unwrap();
        let plain = b.decrypt(1, 1, 5, HOME_ID, &encap).unwrap();
        assert_eq!(plain, vec![0x26, 0x01, 80]);
    }

    #[test]
    fn receiver_catches_up_after_missed_frames() {
        let (mut a, mut b) = engine_pair();
        // Two frames are lost in transit.
        let _ = a.encrypt(5, 1, 5, HOME_ID, b"lost one").unwrap();
        let _ = a.encrypt(5, 1, 5, HOME_ID, b"lost two").unwrap();
        let encap = a.encrypt(5, 1, 5, HOME_ID, b"delivered").unwrap();
        assert_eq!(b.decrypt(1, 1, 5, HOME_ID, &encap).unwrap(), b"delivered");

        // And the positions stay in sync afterwards.
        let encap = a.encrypt(5, 1, 5, HOME_ID, b"next").unwrap();
        assert_eq!(b.decrypt(1, 1, 5, HOME_ID, &encap).unwrap(), b"next");
    }

    #[test]
    fn too_many_missed_frames_fail() {
        let (mut a, mut b) = engine_pair();
        for _ in 0..NONCE_CATCH_UP_WINDOW {
            let _ = a.encrypt(5, 1, 5, HOME_ID, b"lost").unwrap();
        }
        let encap = a.encrypt(5, 1, 5, HOME_ID, b"too far").unwrap();
        assert_eq!(b.decrypt(1, 1, 5, HOME_ID, &encap), Err(CCError::MacFailed));
    }

    #[test]
    fn addressing_is_bound() {
        let (mut a, mut b) = engine_pair();
        let encap = a.encrypt(5, 1, 5, HOME_ID, b"payload").unwrap();
        // Different home id must not verify.
        assert!(b.decrypt(1, 1, 5, HOME_ID + 1, &encap).is_err());
    }

    #[test]
    fn mac_failure_escalation() {
        let keys = NetworkKeys::derive(&[0x42; 16]);
        let mut engine = S2Engine::new(keys);
        engine.establish_span(5, &[0x01; 16], &[0x02; 16]);

        assert_eq!(engine.on_mac_failure(5), ResyncDecision::Resync);
        assert_eq!(engine.on_mac_failure(5), ResyncDecision::Resync);
        assert_eq!(engine.on_mac_failure(5), ResyncDecision::Abort);
        // The SPAN is gone after an abort.
        assert!(!engine.has_span(5));
        // The counter reset with the abort.
        engine.establish_span(5, &[0x01; 16], &[0x02; 16]);
        assert_eq!(engine.on_mac_failure(5), ResyncDecision::Resync);
    }

    #[test]
    fn successful_decrypt_resets_failures() {
        let (mut a, mut b) = engine_pair();
        assert_eq!(b.on_mac_failure(1), ResyncDecision::Resync);
        assert_eq!(b.on_mac_failure(1), ResyncDecision::Resync);
        let encap = a.encrypt(5, 1, 5, HOME_ID, b"ok").unwrap();
        assert!(b.decrypt(1, 1, 5, HOME_ID, &encap).is_ok());
        // Counter restarts after a success.
        assert_eq!(b.on_mac_failure(1), ResyncDecision::Resync);
        assert_eq!(b.on_mac_failure(1), ResyncDecision::Resync);
        assert_eq!(b.on_mac_failure(1), ResyncDecision::Abort);
    }

    #[test]
    fn span_not_synced_error() {
        let keys = NetworkKeys::derive(&[0x42; 16]);
        let mut engine = S2Engine::new(keys);
        assert_eq!(
            engine.encrypt(9, 1, 9, HOME_ID, b"x"),
            Err(CCError::SpanNotSynced(9))
        );
    }

    #[test]
    fn mpan_nonces() {
        let keys = NetworkKeys::derive(&[0x42; 16]);
        let mut engine = S2Engine::new(keys);
        assert!(engine.next_mpan_nonce(3).is_none());
        engine.establish_mpan(3, SpanState::instantiate(&keys.nonce_key, &[0x0A; 16], &[0x0B; 16]));
        let first = engine.next_mpan_nonce(3).unwrap();
        let second = engine.next_mpan_nonce(3).unwrap();
        assert_ne!(first, second);
    }
}
