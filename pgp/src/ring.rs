//! Loading and validating public key rings.
//!
//! A key ring here is a single certificate: one primary key plus its
//! bound sub-keys.  Rings come from key servers or the on-disk cache,
//! so they are untrusted input: a ring is rejected at load time unless
//! every sub-key carries a binding signature that verifies under the
//! primary key.

use std::collections::BTreeSet;
use std::io::Read;
use std::time::SystemTime;

use once_cell::sync::Lazy;
use sequoia_openpgp::cert::amalgamation::ValidateAmalgamation;
use sequoia_openpgp::packet::key::{PublicParts, UnspecifiedRole};
use sequoia_openpgp::packet::Key;
use sequoia_openpgp::parse::Parse;
use sequoia_openpgp::policy::StandardPolicy;
use sequoia_openpgp::types::{HashAlgorithm, RevocationStatus};
use sequoia_openpgp::Cert;
use tracing::debug;

use crate::{KeyFingerprint, KeyId, PgpError, Result};

/// Policy for ring validation.
///
/// SHA-1 stays accepted: binding self-signatures over it are still
/// widespread on key servers, and the strength of the *artifact*
/// signature's hash is judged separately.
static RING_POLICY: Lazy<StandardPolicy> = Lazy::new(|| {
    let mut p = StandardPolicy::new();
    p.accept_hash(HashAlgorithm::SHA1);
    p
});

/// The policy rings and signatures are validated under.
pub fn ring_policy() -> &'static StandardPolicy<'static> {
    &RING_POLICY
}

/// Facts about a signing key, extracted from its ring.
#[derive(Debug, Clone)]
pub struct KeyInfo {
    /// Fingerprint of the key that made the signature.
    pub fingerprint: KeyFingerprint,
    /// Fingerprint of the primary key; set iff the signing key is a
    /// sub-key.
    pub master: Option<KeyFingerprint>,
    /// User ids on the ring, lossily decoded.
    pub uids: BTreeSet<String>,
    /// Key packet version.
    pub version: u8,
    /// OpenPGP public key algorithm id.
    pub algorithm: u8,
    /// Size of the key material in bits.
    pub bits: u32,
    /// Key creation time.
    pub date: SystemTime,
    /// Whether the primary key is revoked.
    pub revoked: bool,
}

impl KeyInfo {
    /// `SubKeyId: 0x… of 0x…` for sub-keys, `KeyId: 0x…` otherwise.
    pub fn key_id_description(&self) -> String {
        match &self.master {
            Some(master) => {
                format!("SubKeyId: {} of {}", self.fingerprint, master)
            }
            None => format!("KeyId: {}", self.fingerprint),
        }
    }
}

/// A revocation found on the primary key.
#[derive(Debug, Clone)]
pub struct RevocationInfo {
    /// Fingerprint of the revoked primary key.
    pub fingerprint: KeyFingerprint,
    /// When the revocation signature was created.
    pub created: Option<SystemTime>,
    /// Human-readable revocation reason, when one was given.
    pub reason: Option<String>,
}

/// A validated public key ring.
pub struct KeyRing {
    cert: Cert,
}

impl KeyRing {
    /// Loads a ring from a reader; ASCII armor is detected
    /// automatically.
    pub fn from_reader<R: Read + Send + Sync>(reader: R) -> Result<Self> {
        let cert = Cert::from_reader(reader).map_err(PgpError::library)?;
        Self::from_cert(cert)
    }

    /// Loads a ring from raw or armored bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cert = Cert::from_bytes(bytes).map_err(PgpError::library)?;
        Self::from_cert(cert)
    }

    /// Validates an already-parsed certificate.
    pub fn from_cert(cert: Cert) -> Result<Self> {
        verify_subkey_bindings(&cert)?;
        debug!(primary = %cert.fingerprint(), "loaded key ring");
        Ok(KeyRing { cert })
    }

    /// The underlying certificate.
    pub fn cert(&self) -> &Cert {
        &self.cert
    }

    /// Fingerprint of the primary key.
    pub fn primary_fingerprint(&self) -> KeyFingerprint {
        KeyFingerprint::from_bytes(self.cert.fingerprint().as_bytes())
    }

    /// Finds the key `id` names inside this ring.
    pub fn find_key(&self, id: &KeyId) -> Result<&Key<PublicParts, UnspecifiedRole>> {
        id.lookup_in(&self.cert)
    }

    /// The primary key, when `key` is one of this ring's sub-keys.
    pub fn master_of<'a>(
        &'a self,
        key: &Key<PublicParts, UnspecifiedRole>,
    ) -> Option<&'a Key<PublicParts, UnspecifiedRole>> {
        if key.fingerprint() == self.cert.fingerprint() {
            None
        } else {
            Some(self.cert.primary_key().key().role_as_unspecified())
        }
    }

    /// All user ids on the ring, decoded with replacement so that
    /// historical malformed UTF-8 never aborts a lookup.
    pub fn user_ids(&self) -> BTreeSet<String> {
        self.cert
            .userids()
            .map(|uid| String::from_utf8_lossy(uid.userid().value()).into_owned())
            .collect()
    }

    /// Whether the primary key carries a verifiable revocation.
    pub fn is_revoked(&self) -> bool {
        matches!(
            self.cert.revocation_status(ring_policy(), None),
            RevocationStatus::Revoked(_)
        )
    }

    /// Details of the primary key's revocation, if any.
    pub fn revocation(&self) -> Option<RevocationInfo> {
        match self.cert.revocation_status(ring_policy(), None) {
            RevocationStatus::Revoked(sigs) => {
                let sig = sigs.first()?;
                let reason = sig.reason_for_revocation().map(|(code, message)| {
                    let message = String::from_utf8_lossy(message);
                    if message.is_empty() {
                        code.to_string()
                    } else {
                        format!("{}: {}", code, message)
                    }
                });
                Some(RevocationInfo {
                    fingerprint: self.primary_fingerprint(),
                    created: sig.signature_creation_time(),
                    reason,
                })
            }
            _ => None,
        }
    }

    /// Extracts [`KeyInfo`] for the key `id` names.
    pub fn key_info(&self, id: &KeyId) -> Result<KeyInfo> {
        let key = self.find_key(id)?;
        let fingerprint = KeyFingerprint::from_bytes(key.fingerprint().as_bytes());
        let master = self
            .master_of(key)
            .map(|pk| KeyFingerprint::from_bytes(pk.fingerprint().as_bytes()));
        Ok(KeyInfo {
            fingerprint,
            master,
            uids: self.user_ids(),
            version: key_version(key),
            algorithm: key.pk_algo().into(),
            bits: key.mpis().bits().unwrap_or(0) as u32,
            date: key.creation_time(),
            revoked: self.is_revoked(),
        })
    }
}

/// Packet version, derived from the fingerprint format.
fn key_version(key: &Key<PublicParts, UnspecifiedRole>) -> u8 {
    match key.fingerprint().as_bytes().len() {
        32 => 5,
        _ => 4,
    }
}

/// Requires a verifiable binding signature on every sub-key.
fn verify_subkey_bindings(cert: &Cert) -> Result<()> {
    for ka in cert.keys().subkeys() {
        if ka.clone().with_policy(ring_policy(), None).is_err() {
            return Err(PgpError::SubkeyBinding {
                subkey: ka.key().fingerprint().to_hex(),
                primary: cert.fingerprint().to_hex(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequoia_openpgp::cert::CertBuilder;
    use sequoia_openpgp::packet::Packet;
    use sequoia_openpgp::serialize::Serialize;

    fn test_cert() -> Cert {
        let (cert, _rev) = CertBuilder::new()
            .add_userid("Alice Example <alice@example.org>")
            .add_signing_subkey()
            .generate()
            .unwrap();
        cert
    }

    #[test]
    fn roundtrip_and_invariants() {
        let cert = test_cert();
        let mut bytes = Vec::new();
        cert.serialize(&mut bytes).unwrap();

        let ring = KeyRing::from_bytes(&bytes).unwrap();
        assert_eq!(
            ring.primary_fingerprint().as_hex(),
            cert.fingerprint().to_hex()
        );
        assert!(ring.user_ids().iter().any(|u| u.contains("alice@example.org")));
        assert!(!ring.is_revoked());
    }

    #[test]
    fn subkey_master_relationship() {
        let ring = KeyRing::from_cert(test_cert()).unwrap();
        let sub_fpr = ring
            .cert()
            .keys()
            .subkeys()
            .next()
            .unwrap()
            .key()
            .fingerprint();

        let id = KeyId::from_bytes(sub_fpr.as_bytes()).unwrap();
        let info = ring.key_info(&id).unwrap();
        assert!(info.master.is_some());
        assert_eq!(
            info.master.as_ref().unwrap().as_hex(),
            ring.cert().fingerprint().to_hex()
        );
        assert!(info
            .key_id_description()
            .starts_with(&format!("SubKeyId: 0x{}", sub_fpr.to_hex())));
    }

    #[test]
    fn primary_key_has_no_master() {
        let ring = KeyRing::from_cert(test_cert()).unwrap();
        let id = KeyId::from_bytes(ring.cert().fingerprint().as_bytes()).unwrap();
        let info = ring.key_info(&id).unwrap();
        assert!(info.master.is_none());
        assert!(info.key_id_description().starts_with("KeyId: 0x"));
        assert!(info.bits >= 256);
    }

    #[test]
    fn long_id_lookup_finds_subkey() {
        let ring = KeyRing::from_cert(test_cert()).unwrap();
        let sub = ring.cert().keys().subkeys().next().unwrap().key().clone();
        let fp = sub.fingerprint();
        let tail: [u8; 8] = fp.as_bytes()[fp.as_bytes().len() - 8..]
            .try_into()
            .unwrap();
        let id = KeyId::LongId(u64::from_be_bytes(tail));
        let found = ring.find_key(&id).unwrap();
        assert_eq!(found.fingerprint(), fp);
    }

    #[test]
    fn missing_key_is_reported() {
        let ring = KeyRing::from_cert(test_cert()).unwrap();
        let id = KeyId::LongId(0x0123_4567_89AB_CDEF);
        assert!(matches!(
            ring.find_key(&id),
            Err(PgpError::KeyNotInRing(_))
        ));
    }

    #[test]
    fn revoked_primary_is_detected() {
        let (cert, rev) = CertBuilder::new()
            .add_userid("Bob <bob@example.org>")
            .add_signing_subkey()
            .generate()
            .unwrap();
        let cert = cert.insert_packets(Some(Packet::from(rev))).unwrap();

        let ring = KeyRing::from_cert(cert).unwrap();
        assert!(ring.is_revoked());
        let revocation = ring.revocation().unwrap();
        assert_eq!(revocation.fingerprint, ring.primary_fingerprint());

        let id = KeyId::from_bytes(
            ring.cert().fingerprint().as_bytes(),
        )
        .unwrap();
        assert!(ring.key_info(&id).unwrap().revoked);
    }
}
