use ethers::utils::keccak256;

/// EIP-137 name hash: the root node is 32 zero bytes and each label is folded
/// in from the right as `keccak256(node ++ keccak256(label))`.
pub fn namehash(name: &str) -> [u8; 32] {
    let mut node = [0u8; 32];
    if name.is_empty() {
        return node;
    }

    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&node);
        buf[32..].copy_from_slice(&label_hash);
        node = keccak256(buf);
    }

    node
}
