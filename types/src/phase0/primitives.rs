use fixed_hash::construct_fixed_hash;
use ssz::SszHash;

pub use ethereum_types::{H160, H256, H32};

pub type CommitteeIndex = u64;
pub type DepositIndex = u64;
pub type Domain = H256;
pub type DomainType = H32;
pub type Epoch = u64;
pub type ExecutionBlockHash = H256;
pub type Gwei = u64;
pub type Slot = u64;
pub type UnixSeconds = u64;
pub type ValidatorIndex = u64;
pub type Version = H32;

// Public keys and signatures are carried around as opaque bytes.
// Decompression and verification are done by whatever signature backend is plugged in.
construct_fixed_hash! {
    pub struct PublicKeyBytes(48);
}

construct_fixed_hash! {
    pub struct SignatureBytes(96);
}

impl AsRef<[u8; 96]> for SignatureBytes {
    fn as_ref(&self) -> &[u8; 96] {
        &self.0
    }
}

impl SszHash for PublicKeyBytes {
    fn hash_tree_root(&self) -> H256 {
        ssz::merkleize_bytes(self, 1)
    }
}

impl SszHash for SignatureBytes {
    fn hash_tree_root(&self) -> H256 {
        ssz::merkleize_bytes(self, 2)
    }
}
