//! Challenge-response authentication for the identify handshake.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Compute the authentication proof sent in the identify frame.
///
/// The server's hello carries a random `salt` and `challenge`; the proof is
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`.
pub fn authentication_proof(password: &str, salt: &str, challenge: &str) -> String {
    let secret = STANDARD.encode(Sha256::digest(format!("{password}{salt}")));
    STANDARD.encode(Sha256::digest(format!("{secret}{challenge}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_proof_known_vector() {
        let proof = authentication_proof(
            "supersecret",
            "PZVbYpvAnZut2SS6JNJytDm9",
            "ztTBnnuqrqaKDzRM3xcVdbYm",
        );
        assert_eq!(proof, "8feeOF01ujNBiQFBqMMiEb6/yB/tJDZyX2sosCp5zLU=");
    }

    #[test]
    fn test_authentication_proof_depends_on_all_inputs() {
        let base = authentication_proof("pw", "salt", "challenge");
        assert_ne!(base, authentication_proof("pw2", "salt", "challenge"));
        assert_ne!(base, authentication_proof("pw", "salt2", "challenge"));
        assert_ne!(base, authentication_proof("pw", "salt", "challenge2"));
    }
}
