//! PKCE verifier and challenge generation (S256).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// A staged verifier/challenge pair.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a fresh verifier (64 random bytes, base64url) and its
/// S256 challenge.
pub fn generate() -> PkcePair {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = challenge_for(&verifier);
    PkcePair {
        verifier,
        challenge,
    }
}

/// The S256 challenge for a verifier: base64url(sha256(verifier)).
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_length_in_rfc_range() {
        let pair = generate();
        // RFC 7636 mandates 43..=128 characters.
        assert!(pair.verifier.len() >= 43 && pair.verifier.len() <= 128);
    }

    #[test]
    fn test_challenge_is_deterministic() {
        let pair = generate();
        assert_eq!(pair.challenge, challenge_for(&pair.verifier));
    }

    #[test]
    fn test_known_challenge() {
        // Appendix B of RFC 7636.
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_verifiers_are_unique() {
        assert_ne!(generate().verifier, generate().verifier);
    }
}
