use sha2::{Digest, Sha256};

/// Stable `[r, g, b]` color for an id: the first three bytes of the SHA-256 of
/// its decimal form, so the same class gets the same color on every run.
pub fn color_for(id: impl std::fmt::Display) -> [u8; 3] {
    let digest = Sha256::digest(id.to_string().as_bytes());

    [digest[0], digest[1], digest[2]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        // sha256("0") = 5feceb66ffc86f38d952786c6d696c79...
        assert_eq!(color_for(0), [0x5f, 0xec, 0xeb]);
    }

    #[test]
    fn stable_and_distinct() {
        assert_eq!(color_for(5), color_for(5));
        assert_ne!(color_for(1), color_for(2));
    }
}
