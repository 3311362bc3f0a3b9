use ethereum_types::H256;

pub trait SszHash {
    /// Number of values packed into a single chunk when hashing homogeneous collections.
    ///
    /// This is 1 for everything except basic types.
    const PACKING_FACTOR: usize = 1;

    fn hash_tree_root(&self) -> H256;

    // The panic could be avoided with some type-level programming, but it's not worth the trouble.
    fn write_packed(&self, _bytes: &mut [u8]) {
        panic!("SszHash::write_packed must be implemented for basic types");
    }
}
