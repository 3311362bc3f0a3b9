#![expect(clippy::module_name_repetitions)]

use std::sync::Arc;

use anyhow::{ensure, Result};
use types::phase0::primitives::{PublicKeyBytes, SignatureBytes, H256};

use crate::error::{Error, SignatureKind};

/// Signature verification provided by the node.
///
/// Keys and signatures are passed as compressed bytes. Implementations must return `false` for
/// bytes that do not decompress.
pub trait SignatureBackend: Send + Sync {
    fn verify(&self, public_key: PublicKeyBytes, message: H256, signature: SignatureBytes) -> bool;

    fn fast_aggregate_verify(
        &self,
        public_keys: &[PublicKeyBytes],
        message: H256,
        signature: SignatureBytes,
    ) -> bool;
}

impl<B: SignatureBackend + ?Sized> SignatureBackend for &B {
    #[inline]
    fn verify(&self, public_key: PublicKeyBytes, message: H256, signature: SignatureBytes) -> bool {
        (**self).verify(public_key, message, signature)
    }

    #[inline]
    fn fast_aggregate_verify(
        &self,
        public_keys: &[PublicKeyBytes],
        message: H256,
        signature: SignatureBytes,
    ) -> bool {
        (**self).fast_aggregate_verify(public_keys, message, signature)
    }
}

impl<B: SignatureBackend + ?Sized> SignatureBackend for Arc<B> {
    #[inline]
    fn verify(&self, public_key: PublicKeyBytes, message: H256, signature: SignatureBytes) -> bool {
        (**self).verify(public_key, message, signature)
    }

    #[inline]
    fn fast_aggregate_verify(
        &self,
        public_keys: &[PublicKeyBytes],
        message: H256,
        signature: SignatureBytes,
    ) -> bool {
        (**self).fast_aggregate_verify(public_keys, message, signature)
    }
}

pub trait Verifier {
    const IS_NULL: bool;

    fn reserve(&mut self, additional: usize);

    fn verify_singular(
        &mut self,
        message: H256,
        signature: SignatureBytes,
        public_key: PublicKeyBytes,
        signature_kind: SignatureKind,
    ) -> Result<()>;

    fn verify_aggregate(
        &mut self,
        message: H256,
        signature: SignatureBytes,
        public_keys: impl IntoIterator<Item = PublicKeyBytes>,
        signature_kind: SignatureKind,
    ) -> Result<()>;

    /// Checks a deposit proof of possession immediately.
    ///
    /// Invalid deposits are skipped rather than rejected, so the result cannot be deferred.
    fn is_valid_proof_of_possession(
        &self,
        message: H256,
        signature: SignatureBytes,
        public_key: PublicKeyBytes,
    ) -> bool;

    fn finish(&self) -> Result<()>;
}

impl<V: Verifier> Verifier for &mut V {
    const IS_NULL: bool = V::IS_NULL;

    #[inline]
    fn reserve(&mut self, additional: usize) {
        (*self).reserve(additional)
    }

    #[inline]
    fn verify_singular(
        &mut self,
        message: H256,
        signature: SignatureBytes,
        public_key: PublicKeyBytes,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        (*self).verify_singular(message, signature, public_key, signature_kind)
    }

    #[inline]
    fn verify_aggregate(
        &mut self,
        message: H256,
        signature: SignatureBytes,
        public_keys: impl IntoIterator<Item = PublicKeyBytes>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        (*self).verify_aggregate(message, signature, public_keys, signature_kind)
    }

    #[inline]
    fn is_valid_proof_of_possession(
        &self,
        message: H256,
        signature: SignatureBytes,
        public_key: PublicKeyBytes,
    ) -> bool {
        (**self).is_valid_proof_of_possession(message, signature, public_key)
    }

    #[inline]
    fn finish(&self) -> Result<()> {
        (**self).finish()
    }
}

/// Accepts every signature, including deposit proofs of possession.
///
/// Used for blocks that are already known to be valid and for genesis states with synthetic keys.
#[derive(Clone, Copy, Default, Debug)]
pub struct NullVerifier;

impl Verifier for NullVerifier {
    const IS_NULL: bool = true;

    #[inline]
    fn reserve(&mut self, _additional: usize) {}

    #[inline]
    fn verify_singular(
        &mut self,
        _message: H256,
        _signature: SignatureBytes,
        _public_key: PublicKeyBytes,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn verify_aggregate(
        &mut self,
        _message: H256,
        _signature: SignatureBytes,
        _public_keys: impl IntoIterator<Item = PublicKeyBytes>,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn is_valid_proof_of_possession(
        &self,
        _message: H256,
        _signature: SignatureBytes,
        _public_key: PublicKeyBytes,
    ) -> bool {
        true
    }

    #[inline]
    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Skips block-level signatures but still checks deposit proofs of possession.
///
/// Replaying already imported blocks with this produces the same registry as the original import.
#[derive(Clone, Copy, Debug)]
pub struct DepositOnlyVerifier<B> {
    backend: B,
}

impl<B> DepositOnlyVerifier<B> {
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: SignatureBackend> Verifier for DepositOnlyVerifier<B> {
    const IS_NULL: bool = true;

    #[inline]
    fn reserve(&mut self, _additional: usize) {}

    #[inline]
    fn verify_singular(
        &mut self,
        _message: H256,
        _signature: SignatureBytes,
        _public_key: PublicKeyBytes,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn verify_aggregate(
        &mut self,
        _message: H256,
        _signature: SignatureBytes,
        _public_keys: impl IntoIterator<Item = PublicKeyBytes>,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn is_valid_proof_of_possession(
        &self,
        message: H256,
        signature: SignatureBytes,
        public_key: PublicKeyBytes,
    ) -> bool {
        self.backend.verify(public_key, message, signature)
    }

    #[inline]
    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Verifies every signature as soon as it is submitted.
pub struct SingleVerifier<B> {
    backend: B,
}

impl<B> SingleVerifier<B> {
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: SignatureBackend> Verifier for SingleVerifier<B> {
    const IS_NULL: bool = false;

    #[inline]
    fn reserve(&mut self, _additional: usize) {}

    #[inline]
    fn verify_singular(
        &mut self,
        message: H256,
        signature: SignatureBytes,
        public_key: PublicKeyBytes,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        ensure!(
            self.backend.verify(public_key, message, signature),
            Error::SignatureInvalid(signature_kind),
        );

        Ok(())
    }

    #[inline]
    fn verify_aggregate(
        &mut self,
        message: H256,
        signature: SignatureBytes,
        public_keys: impl IntoIterator<Item = PublicKeyBytes>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        let public_keys = public_keys.into_iter().collect::<Vec<_>>();

        ensure!(
            self.backend
                .fast_aggregate_verify(&public_keys, message, signature),
            Error::SignatureInvalid(signature_kind),
        );

        Ok(())
    }

    #[inline]
    fn is_valid_proof_of_possession(
        &self,
        message: H256,
        signature: SignatureBytes,
        public_key: PublicKeyBytes,
    ) -> bool {
        self.backend.verify(public_key, message, signature)
    }

    #[inline]
    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Collects signatures and verifies all of them in [`Verifier::finish`].
///
/// A block is rejected as a whole if any of its signatures is invalid, so the failing signature
/// does not need to be identified until then.
pub struct MultiVerifier<B> {
    backend: B,
    pending: Vec<PendingSignature>,
}

impl<B> MultiVerifier<B> {
    pub const fn new(backend: B) -> Self {
        Self {
            backend,
            pending: vec![],
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl<B: SignatureBackend> Verifier for MultiVerifier<B> {
    const IS_NULL: bool = false;

    #[inline]
    fn reserve(&mut self, additional: usize) {
        self.pending.reserve_exact(additional);
    }

    #[inline]
    fn verify_singular(
        &mut self,
        message: H256,
        signature: SignatureBytes,
        public_key: PublicKeyBytes,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        self.pending.push(PendingSignature {
            message,
            signature,
            public_keys: vec![public_key],
            signature_kind,
        });

        Ok(())
    }

    #[inline]
    fn verify_aggregate(
        &mut self,
        message: H256,
        signature: SignatureBytes,
        public_keys: impl IntoIterator<Item = PublicKeyBytes>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        self.pending.push(PendingSignature {
            message,
            signature,
            public_keys: public_keys.into_iter().collect(),
            signature_kind,
        });

        Ok(())
    }

    #[inline]
    fn is_valid_proof_of_possession(
        &self,
        message: H256,
        signature: SignatureBytes,
        public_key: PublicKeyBytes,
    ) -> bool {
        self.backend.verify(public_key, message, signature)
    }

    fn finish(&self) -> Result<()> {
        for pending in &self.pending {
            let PendingSignature {
                message,
                signature,
                ref public_keys,
                signature_kind,
            } = *pending;

            let valid = match public_keys.as_slice() {
                [public_key] => self.backend.verify(*public_key, message, signature),
                _ => self
                    .backend
                    .fast_aggregate_verify(public_keys, message, signature),
            };

            ensure!(valid, Error::SignatureInvalid(signature_kind));
        }

        Ok(())
    }
}

struct PendingSignature {
    message: H256,
    signature: SignatureBytes,
    public_keys: Vec<PublicKeyBytes>,
    signature_kind: SignatureKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Treats a signature as valid if its first byte equals the first byte of the message.
    struct FirstByteBackend;

    impl SignatureBackend for FirstByteBackend {
        fn verify(
            &self,
            _public_key: PublicKeyBytes,
            message: H256,
            signature: SignatureBytes,
        ) -> bool {
            message[0] == signature[0]
        }

        fn fast_aggregate_verify(
            &self,
            public_keys: &[PublicKeyBytes],
            message: H256,
            signature: SignatureBytes,
        ) -> bool {
            !public_keys.is_empty() && message[0] == signature[0]
        }
    }

    fn signature(first_byte: u8) -> SignatureBytes {
        let mut signature = SignatureBytes::zero();
        signature.as_bytes_mut()[0] = first_byte;
        signature
    }

    #[test]
    fn single_verifier_fails_immediately() {
        let mut verifier = SingleVerifier::new(FirstByteBackend);
        let message = H256::repeat_byte(7);

        verifier
            .verify_singular(message, signature(7), PublicKeyBytes::zero(), SignatureKind::Block)
            .expect("signature matches message");

        let error = verifier
            .verify_singular(message, signature(8), PublicKeyBytes::zero(), SignatureKind::Block)
            .expect_err("signature does not match message");

        assert_eq!(error.to_string(), "block signature is invalid");
    }

    #[test]
    fn multi_verifier_defers_until_finish() {
        let mut verifier = MultiVerifier::new(FirstByteBackend);
        let message = H256::repeat_byte(7);

        verifier
            .verify_singular(message, signature(7), PublicKeyBytes::zero(), SignatureKind::Block)
            .expect("signatures are collected");

        verifier
            .verify_aggregate(
                message,
                signature(1),
                core::iter::empty(),
                SignatureKind::Attestation,
            )
            .expect("signatures are collected");

        assert_eq!(verifier.pending_count(), 2);

        let error = verifier.finish().expect_err("aggregate signature is invalid");

        assert_eq!(error.to_string(), "attestation signature is invalid");
    }

    #[test]
    fn deposit_only_verifier_checks_proofs_of_possession() {
        let mut verifier = DepositOnlyVerifier::new(FirstByteBackend);
        let message = H256::repeat_byte(7);

        verifier
            .verify_singular(message, signature(8), PublicKeyBytes::zero(), SignatureKind::Block)
            .expect("block signatures are skipped");

        let public_key = PublicKeyBytes::zero();

        assert!(verifier.is_valid_proof_of_possession(message, signature(7), public_key));
        assert!(!verifier.is_valid_proof_of_possession(message, signature(8), public_key));
        assert!(NullVerifier.is_valid_proof_of_possession(message, signature(8), public_key));
    }
}
