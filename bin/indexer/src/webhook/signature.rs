use hmac::{Hmac, Mac};

type HmacSha256 = Hmac<sha2::Sha256>;

pub const SIGNATURE_HEADER: &str = "x-alchemy-signature";

/// Verifies webhook bodies against the shared signing key
#[derive(Clone)]
pub struct SignatureVerifier {
    signing_key: String,
}

impl SignatureVerifier {
    pub fn new(signing_key: impl Into<String>) -> Self {
        Self {
            signing_key: signing_key.into(),
        }
    }

    /// Hex HMAC-SHA256 of `body`
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature. Malformed hex never matches.
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        let signature = signature.trim();
        let signature = signature.strip_prefix("0x").unwrap_or(signature);
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.signing_key.as_bytes()).expect("HMAC can take key of any size")
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}
