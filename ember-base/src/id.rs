use std::hash::{Hash, Hasher};

/// We use hashes of descriptors for table keys as that makes them deterministic
/// across runs, which is a nice property to have in general.
/// It would allow storing of precomputed data.
pub type HashId = u64;
pub type DescriptorHash = HashId;

pub(crate) fn make_hasher() -> impl Hasher {
    // We explicitly specify the keys so that the hash will be stable.
    siphasher::sip::SipHasher::new_with_keys(0, 0)
}

/// Hash of a descriptor's modified-UTF8 bytes.
#[must_use]
pub fn hash_descriptor(descriptor: &str) -> DescriptorHash {
    hash_descriptor_bytes(descriptor.as_bytes())
}

#[must_use]
pub fn hash_descriptor_bytes(descriptor: &[u8]) -> DescriptorHash {
    let mut state = make_hasher();
    descriptor.hash(&mut state);
    state.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_representations() {
        assert_eq!(
            hash_descriptor("Ljava/lang/Object;"),
            hash_descriptor_bytes(b"Ljava/lang/Object;")
        );
        assert_ne!(hash_descriptor("I"), hash_descriptor("J"));
    }
}
