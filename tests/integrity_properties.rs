//! Property-based tests for payload integrity
//!
//! ## Properties Verified
//!
//! - Any single-byte change to a data payload changes its digest
//! - Verification of the tampered payload fails with `IntegrityViolation`
//! - A payload always verifies against its own digest, in either case

use proptest::prelude::*;
use teebox::integrity::{compute_hash, verify, verify_payloads};
use teebox::testing::ScriptedBackend;
use teebox::{PayloadRef, Session, SessionState, TeeError};

fn payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..5)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: flipping one byte of one payload is always detected
    #[test]
    fn prop_single_byte_change_detected(
        data in payloads(),
        pick in any::<prop::sample::Index>(),
        offset in any::<prop::sample::Index>(),
        delta in 1u8..=255,
    ) {
        let hashes: Vec<String> = data.iter().map(|d| compute_hash(d)).collect();

        let target = pick.index(data.len());
        let mut tampered = data.clone();
        let at = offset.index(tampered[target].len());
        tampered[target][at] = tampered[target][at].wrapping_add(delta);

        prop_assert_ne!(compute_hash(&tampered[target]), hashes[target].clone());

        let err = verify_payloads(b"alg", &tampered, &compute_hash(b"alg"), &hashes).unwrap_err();
        match err {
            TeeError::IntegrityViolation { payload, .. } => {
                prop_assert_eq!(payload, PayloadRef::Data(target));
            }
            other => prop_assert!(false, "unexpected error {:?}", other),
        }
    }

    /// Property: the controller refuses tampered data and stays loaded
    #[test]
    fn prop_session_rejects_tampered_data(
        data in payloads(),
        pick in any::<prop::sample::Index>(),
    ) {
        let hashes: Vec<String> = data.iter().map(|d| compute_hash(d)).collect();
        let target = pick.index(data.len());
        let mut tampered = data;
        tampered[target][0] ^= 0x01;

        let mut session = Session::with_backend(Box::new(ScriptedBackend::echo()));
        session.create().unwrap();
        session.upload(b"echo".to_vec(), tampered).unwrap();

        prop_assert!(session.verify(&compute_hash(b"echo"), &hashes).is_err());
        prop_assert_eq!(session.state(), SessionState::Loaded);
        prop_assert!(session.execute().is_err());
        session.destroy().unwrap();
    }

    /// Property: a digest always verifies against itself, ignoring case
    #[test]
    fn prop_digest_self_verifies(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let digest = compute_hash(&bytes);
        prop_assert_eq!(digest.len(), 64);
        prop_assert!(verify(&digest, &digest));
        prop_assert!(verify(&digest.to_uppercase(), &digest));
        prop_assert!(!verify("", &digest));
    }
}
