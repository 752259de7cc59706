use sha2::{Digest, Sha256};

use crate::error::SignError;
use crate::packet::{Data, Signature, SignatureKind};

/// Signs every outgoing response exactly once.
pub trait Signer: Send + Sync {
    fn sign(&self, data: &mut Data) -> Result<(), SignError>;
}

/// SHA-256 digest over the signed portion of the packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestSigner;

impl Signer for DigestSigner {
    fn sign(&self, data: &mut Data) -> Result<(), SignError> {
        if data.name.is_empty() {
            return Err(SignError::EmptyName);
        }
        let digest = Sha256::digest(data.signed_portion());
        data.signature = Some(Signature {
            kind: SignatureKind::DigestSha256,
            value: hex::encode(digest),
        });
        Ok(())
    }
}

/// Checks a digest signature. Unsigned packets never verify.
pub fn verify(data: &Data) -> bool {
    match &data.signature {
        Some(Signature {
            kind: SignatureKind::DigestSha256,
            value,
        }) => hex::encode(Sha256::digest(data.signed_portion())) == *value,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Name;

    #[test]
    fn signed_data_verifies_until_tampered() {
        let mut data = Data::new("/serverA/7/testApp/v=1".parse().unwrap()).with_content("HELLO KITTY");
        assert!(!verify(&data));

        DigestSigner.sign(&mut data).unwrap();
        assert!(verify(&data));

        data.content = b"HELLO DOGGY".to_vec();
        assert!(!verify(&data));
    }

    #[test]
    fn empty_name_cannot_be_signed() {
        let mut data = Data::new(Name::root());
        assert!(matches!(
            DigestSigner.sign(&mut data),
            Err(SignError::EmptyName)
        ));
        assert!(data.signature.is_none());
    }
}
