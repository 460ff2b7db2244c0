//! Rotating credential store used to decrypt inbound encrypted-identity
//! Data Elements.
//!
//! Field names use `key_seed`/`metadata_encryption_key_tag` rather than
//! the original C++'s `authenticity_key`/`metadata_encryption_key`.

use std::collections::HashMap;

/// Which bucket of the advertisement's identity an advertisement claims to
/// carry. Determines which credentials are tried during decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum IdentityType {
    Public,
    PrivateGroup,
    ContactsGroup,
}

/// A credential shared by the scanner with a broadcaster (or vice versa),
/// used to decrypt/verify an encrypted identity DE.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SharedCredential {
    pub id: String,
    pub key_seed: [u8; 32],
    pub metadata_encryption_key_tag: [u8; 32],
}

/// The broadcaster-side counterpart used to encrypt outgoing
/// advertisements; carries the same key material as the matching
/// [`SharedCredential`] plus nothing else, since encryption needs no
/// additional secret beyond what the scanner already has a copy of.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LocalCredential {
    pub id: String,
    pub key_seed: [u8; 32],
    pub metadata_encryption_key_tag: [u8; 32],
}

impl From<&LocalCredential> for SharedCredential {
    fn from(local: &LocalCredential) -> Self {
        SharedCredential {
            id: local.id.clone(),
            key_seed: local.key_seed,
            metadata_encryption_key_tag: local.metadata_encryption_key_tag,
        }
    }
}

/// Scanner-side map from identity type to the set of credentials currently
/// valid for it. Decryption tries every candidate in the bucket matching
/// the advertisement's claimed identity type.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    by_identity: HashMap<IdentityType, Vec<SharedCredential>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: IdentityType, credential: SharedCredential) {
        self.by_identity.entry(identity).or_default().push(credential);
    }

    pub fn candidates(&self, identity: IdentityType) -> &[SharedCredential] {
        self.by_identity
            .get(&identity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
