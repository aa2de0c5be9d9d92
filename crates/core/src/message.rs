use serde::Serialize;

use crate::envelope::Envelope;
use crate::signature::{SignatureError, compute_signature, verify_signature};

/// Behavior shared by every wire message in the pipeline.
///
/// A message owns its [`Envelope`], derives its broker subject from its own
/// contents, and can be signed and verified with the process signing secret.
pub trait Message: Serialize {
    /// The message's envelope.
    fn envelope(&self) -> &Envelope;

    /// Mutable access to the envelope (used by [`sign`](Self::sign)).
    fn envelope_mut(&mut self) -> &mut Envelope;

    /// The broker subject this message publishes to.
    fn subject(&self) -> String;

    /// Compute the MAC over the message (signature field emptied) and store
    /// it in the envelope.
    fn sign(&mut self, secret: &[u8]) -> Result<(), SignatureError>
    where
        Self: Sized,
    {
        let signature = compute_signature(self, secret)?;
        self.envelope_mut().signature = signature;
        Ok(())
    }

    /// Verify the envelope signature in constant time.
    fn verify(&self, secret: &[u8]) -> Result<bool, SignatureError>
    where
        Self: Sized,
    {
        let signature = self.envelope().signature.clone();
        if signature.is_empty() {
            return Ok(false);
        }
        verify_signature(self, &signature, secret)
    }
}
