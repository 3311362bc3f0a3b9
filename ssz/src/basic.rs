use ethereum_types::{H256, H32};

use crate::porcelain::SszHash;

impl SszHash for u64 {
    const PACKING_FACTOR: usize = 4;

    fn hash_tree_root(&self) -> H256 {
        let mut chunk = H256::zero();
        self.write_packed(chunk.as_bytes_mut());
        chunk
    }

    fn write_packed(&self, bytes: &mut [u8]) {
        bytes[..size_of::<Self>()].copy_from_slice(&self.to_le_bytes());
    }
}

impl SszHash for bool {
    const PACKING_FACTOR: usize = 32;

    fn hash_tree_root(&self) -> H256 {
        let mut chunk = H256::zero();
        self.write_packed(chunk.as_bytes_mut());
        chunk
    }

    fn write_packed(&self, bytes: &mut [u8]) {
        bytes[0] = (*self).into();
    }
}

impl SszHash for H256 {
    fn hash_tree_root(&self) -> H256 {
        *self
    }
}

// `H32` is used for fork versions and domain types, which are hashed as `Bytes4`.
impl SszHash for H32 {
    fn hash_tree_root(&self) -> H256 {
        let mut chunk = H256::zero();
        chunk[..Self::len_bytes()].copy_from_slice(self.as_bytes());
        chunk
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn basic_values_are_zero_padded() {
        assert_eq!(
            0x0102_u64.hash_tree_root(),
            H256(hex!(
                "0201000000000000000000000000000000000000000000000000000000000000"
            )),
        );

        assert_eq!(
            true.hash_tree_root(),
            H256(hex!(
                "0100000000000000000000000000000000000000000000000000000000000000"
            )),
        );

        assert_eq!(
            H32(hex!("01020304")).hash_tree_root(),
            H256(hex!(
                "0102030400000000000000000000000000000000000000000000000000000000"
            )),
        );
    }
}
