//! Dispatch request signing.
//!
//! Each task is signed with HMAC-SHA256 over its idempotency key and token
//! under a secret shared with executors. Executors verify before doing any
//! work, so a forged or tampered task is rejected at the boundary.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies dispatch tasks with a shared secret.
#[derive(Clone)]
pub struct TaskSigner {
  secret: Vec<u8>,
}

impl TaskSigner {
  pub fn new(secret: impl Into<Vec<u8>>) -> Self {
    Self {
      secret: secret.into(),
    }
  }

  fn mac(&self) -> HmacSha256 {
    // HMAC accepts keys of any length.
    HmacSha256::new_from_slice(&self.secret).expect("HMAC key of any length is valid")
  }

  /// Hex-encoded HMAC-SHA256 over `idempotency_key` and `token`.
  pub fn sign(&self, idempotency_key: &str, token: &str) -> String {
    let mut mac = self.mac();
    mac.update(idempotency_key.as_bytes());
    mac.update(b"\n");
    mac.update(token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
  }

  /// Constant-time verification of a presented signature.
  pub fn verify(&self, idempotency_key: &str, token: &str, signature: &str) -> bool {
    let Ok(bytes) = hex::decode(signature) else {
      return false;
    };
    let mut mac = self.mac();
    mac.update(idempotency_key.as_bytes());
    mac.update(b"\n");
    mac.update(token.as_bytes());
    mac.verify_slice(&bytes).is_ok()
  }
}
