//! Detached signature handling.
//!
//! Loading walks the packet stream rather than assuming a bare
//! signature: some tools wrap detached signatures in a compressed
//! container, and keyservers have served signatures preceded by
//! stray literal packets.  Issuer extraction reconciles the
//! `Issuer` and `IssuerFingerprint` subpackets, closing the known
//! substitution games against v4 signatures.

use std::io::{BufReader, Read};
use std::time::SystemTime;

use sequoia_openpgp::packet::signature::subpacket::{
    SubpacketArea, SubpacketTag, SubpacketValue,
};
use sequoia_openpgp::packet::{Packet, Signature};
use sequoia_openpgp::parse::stream::{
    DetachedVerifierBuilder, MessageLayer, MessageStructure, VerificationError,
    VerificationHelper,
};
use sequoia_openpgp::parse::{PacketParser, PacketParserResult, Parse};
use sequoia_openpgp::serialize::Serialize;
use sequoia_openpgp::types::{HashAlgorithm, PublicKeyAlgorithm};
use sequoia_openpgp::{Cert, KeyHandle};
use tracing::debug;

use crate::ring::{ring_policy, KeyRing};
use crate::{KeyId, PgpError, Result};

/// Artifact bytes are streamed into the verifier in chunks of this
/// size; artifacts are never read into memory whole.
const READ_CHUNK: usize = 64 * 1024;

/// Facts about a detached signature, for reporting.
#[derive(Debug, Clone)]
pub struct SignatureInfo {
    /// Signature packet version.
    pub version: u8,
    /// Public key algorithm of the issuing key.
    pub key_algorithm: PublicKeyAlgorithm,
    /// Hash algorithm the signature was made over.
    pub hash_algorithm: HashAlgorithm,
    /// Signature creation time, when recorded.
    pub created: Option<SystemTime>,
    /// The issuer, as derived by [`issuer_key_id`].
    pub key_id: KeyId,
}

/// Extracts the first signature from a detached-signature stream.
///
/// ASCII armor is detected automatically.  A `CompressedData` wrapper
/// is descended into; literal data is drained.  Reaching the end of
/// the stream without a signature fails with
/// [`PgpError::SignatureNotFound`].
pub fn load_signature<R: Read + Send + Sync>(reader: R) -> Result<Signature> {
    let mut ppr = PacketParser::from_reader(reader).map_err(PgpError::library)?;
    while let PacketParserResult::Some(pp) = ppr {
        // recurse() descends into container packets, so a compressed
        // wrapper's children turn up on later iterations.
        let (packet, next) = pp.recurse().map_err(PgpError::library)?;
        ppr = next;
        match packet {
            Packet::Signature(sig) => return Ok(sig),
            Packet::CompressedData(_)
            | Packet::Literal(_)
            | Packet::OnePassSig(_)
            | Packet::Marker(_) => (),
            other => {
                debug!(tag = ?other.tag(), "skipping packet while looking for a signature");
            }
        }
    }
    Err(PgpError::SignatureNotFound)
}

/// Classifies the signature's hash algorithm.
///
/// Returns the algorithm name iff it is too weak to trust; `None` for
/// the accepted set.  Ids this verifier does not know are a hard
/// error rather than silently passing.
pub fn weak_hash_algorithm(sig: &Signature) -> Result<Option<&'static str>> {
    match u8::from(sig.hash_algo()) {
        1 => Ok(Some("MD5")),
        4 => Ok(Some("DOUBLE_SHA")),
        5 => Ok(Some("MD2")),
        6 => Ok(Some("TIGER_192")),
        7 => Ok(Some("HAVAL_5_160")),
        11 => Ok(Some("SHA224")),
        // SHA-1 and RIPEMD-160 are accepted for compatibility with the
        // long tail of existing artifact signatures.
        2 | 3 | 8 | 9 | 10 => Ok(None),
        id => Err(PgpError::UnsupportedHashAlgorithm(id)),
    }
}

/// Derives the issuer [`KeyId`], reconciling the subpacket areas.
///
/// The fingerprint is preferred from the hashed area; the key id from
/// the unhashed area (a zero key id counts as absent).  When both
/// areas carry a key id they must agree, and a v4 fingerprint must
/// embed the key id in its low 64 bits.  32-byte fingerprints do not
/// embed a long id, so they skip the cross-check.  The fingerprint
/// form wins when available.
pub fn issuer_key_id(sig: &Signature) -> Result<KeyId> {
    let fingerprint = first_issuer_fingerprint(sig.hashed_area())
        .or_else(|| first_issuer_fingerprint(sig.unhashed_area()));

    let hashed_id = first_issuer(sig.hashed_area());
    let unhashed_id = first_issuer(sig.unhashed_area());
    if let (Some(a), Some(b)) = (hashed_id, unhashed_id) {
        if a != b {
            return Err(PgpError::KeyIdMismatch {
                hashed: a,
                unhashed: b,
            });
        }
    }
    let key_id = unhashed_id.or(hashed_id);

    if let (Some(fp), Some(id)) = (&fingerprint, key_id) {
        if fp.len() == 20 {
            let tail: [u8; 8] = fp[fp.len() - 8..].try_into().unwrap();
            if u64::from_be_bytes(tail) != id {
                return Err(PgpError::FingerprintKeyIdMismatch {
                    fingerprint: hex::encode_upper(fp),
                    key_id: id,
                });
            }
        }
    }

    match (fingerprint, key_id) {
        (Some(fp), _) => Ok(KeyId::Fingerprint(fp)),
        (None, Some(id)) => Ok(KeyId::LongId(id)),
        (None, None) => Err(PgpError::MissingIssuer),
    }
}

fn first_issuer_fingerprint(area: &SubpacketArea) -> Option<Vec<u8>> {
    area.subpackets(SubpacketTag::IssuerFingerprint)
        .find_map(|sp| match sp.value() {
            SubpacketValue::IssuerFingerprint(fp) => Some(fp.as_bytes().to_vec()),
            _ => None,
        })
}

fn first_issuer(area: &SubpacketArea) -> Option<u64> {
    area.subpackets(SubpacketTag::Issuer)
        .find_map(|sp| match sp.value() {
            SubpacketValue::Issuer(keyid) => {
                let bytes = keyid.as_bytes();
                if bytes.len() != 8 {
                    return None;
                }
                match u64::from_be_bytes(bytes.try_into().unwrap()) {
                    0 => None,
                    id => Some(id),
                }
            }
            _ => None,
        })
}

/// Collects [`SignatureInfo`] from a parsed signature.
pub fn signature_info(sig: &Signature) -> Result<SignatureInfo> {
    Ok(SignatureInfo {
        version: sig.version(),
        key_algorithm: sig.pk_algo(),
        hash_algorithm: sig.hash_algo(),
        created: sig.signature_creation_time(),
        key_id: issuer_key_id(sig)?,
    })
}

#[derive(Default)]
struct Outcome {
    good: bool,
    mismatch: bool,
    error: Option<String>,
}

struct RingHelper {
    cert: Cert,
    outcome: Outcome,
}

impl VerificationHelper for RingHelper {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> sequoia_openpgp::Result<Vec<Cert>> {
        Ok(vec![self.cert.clone()])
    }

    fn check(&mut self, structure: MessageStructure) -> sequoia_openpgp::Result<()> {
        for layer in structure {
            if let MessageLayer::SignatureGroup { results } = layer {
                for result in results {
                    match result {
                        Ok(_) => self.outcome.good = true,
                        Err(VerificationError::BadSignature { error, .. }) => {
                            debug!(%error, "signature does not verify");
                            self.outcome.mismatch = true;
                        }
                        Err(e) => self.outcome.error = Some(e.to_string()),
                    }
                }
            }
        }
        // All outcomes are interpreted by the caller; failing here
        // would abort the stream with an opaque error instead.
        Ok(())
    }
}

/// Verifies `sig` over the bytes of `data` against `ring`.
///
/// `Ok(true)` is a cryptographically valid signature, `Ok(false)` a
/// clean mismatch.  Hard failures (unusable key, malformed packet)
/// are errors.  `data` is streamed; it is never held in memory whole.
pub fn verify_detached<R: Read + Send + Sync>(
    sig: &Signature,
    ring: &KeyRing,
    data: R,
) -> Result<bool> {
    let mut sig_bytes = Vec::new();
    Packet::from(sig.clone())
        .serialize(&mut sig_bytes)
        .map_err(PgpError::library)?;

    let helper = RingHelper {
        cert: ring.cert().clone(),
        outcome: Outcome::default(),
    };

    let mut verifier = DetachedVerifierBuilder::from_bytes(&sig_bytes)
        .map_err(PgpError::library)?
        .with_policy(ring_policy(), None, helper)
        .map_err(PgpError::library)?;
    verifier
        .verify_reader(BufReader::with_capacity(READ_CHUNK, data))
        .map_err(PgpError::library)?;

    let outcome = verifier.into_helper().outcome;
    if outcome.good {
        Ok(true)
    } else if outcome.mismatch {
        Ok(false)
    } else {
        Err(PgpError::Verification(
            outcome
                .error
                .unwrap_or_else(|| "no verifiable signature layer".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequoia_openpgp::armor;
    use sequoia_openpgp::cert::CertBuilder;
    use sequoia_openpgp::crypto::KeyPair;
    use sequoia_openpgp::packet::signature::SignatureBuilder;
    use sequoia_openpgp::types::SignatureType;

    fn signing_key() -> (Cert, KeyPair) {
        let (cert, _rev) = CertBuilder::new()
            .add_userid("Carol <carol@example.org>")
            .add_signing_subkey()
            .generate()
            .unwrap();
        let keypair = cert
            .keys()
            .unencrypted_secret()
            .with_policy(ring_policy(), None)
            .supported()
            .for_signing()
            .next()
            .unwrap()
            .key()
            .clone()
            .into_keypair()
            .unwrap();
        (cert, keypair)
    }

    fn detached_signature(keypair: &mut KeyPair, data: &[u8]) -> Signature {
        SignatureBuilder::new(SignatureType::Binary)
            .sign_message(keypair, data)
            .unwrap()
    }

    fn armored(sig: &Signature) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut w = armor::Writer::new(&mut out, armor::Kind::Signature).unwrap();
            Packet::from(sig.clone()).serialize(&mut w).unwrap();
            w.finalize().unwrap();
        }
        out
    }

    #[test]
    fn load_binary_and_armored() {
        let (_cert, mut keypair) = signing_key();
        let sig = detached_signature(&mut keypair, b"payload");

        let mut binary = Vec::new();
        Packet::from(sig.clone()).serialize(&mut binary).unwrap();
        assert!(load_signature(&binary[..]).is_ok());

        let armored = armored(&sig);
        assert!(load_signature(&armored[..]).is_ok());
    }

    #[test]
    fn empty_stream_has_no_signature() {
        assert!(matches!(
            load_signature(&b""[..]),
            Err(PgpError::SignatureNotFound)
        ));
    }

    #[test]
    fn issuer_prefers_fingerprint() {
        let (cert, mut keypair) = signing_key();
        let sig = detached_signature(&mut keypair, b"payload");

        let id = issuer_key_id(&sig).unwrap();
        let signer_fpr = cert
            .keys()
            .with_policy(ring_policy(), None)
            .supported()
            .for_signing()
            .next()
            .unwrap()
            .key()
            .fingerprint();
        match id {
            KeyId::Fingerprint(fp) => assert_eq!(fp, signer_fpr.as_bytes()),
            KeyId::LongId(_) => panic!("fingerprint subpacket should win"),
        }
    }

    #[test]
    fn modern_hash_is_not_weak() {
        let (_cert, mut keypair) = signing_key();
        let sig = detached_signature(&mut keypair, b"payload");
        assert_eq!(weak_hash_algorithm(&sig).unwrap(), None);
    }

    #[test]
    fn verify_good_and_tampered() {
        let (cert, mut keypair) = signing_key();
        let data = b"the artifact bytes";
        let sig = detached_signature(&mut keypair, &data[..]);
        let ring = KeyRing::from_cert(cert).unwrap();

        assert!(verify_detached(&sig, &ring, &data[..]).unwrap());
        assert!(!verify_detached(&sig, &ring, &b"tampered bytes"[..]).unwrap());
    }

    #[test]
    fn verify_against_wrong_ring_is_an_error() {
        let (_cert, mut keypair) = signing_key();
        let sig = detached_signature(&mut keypair, b"payload");

        let (other, _) = CertBuilder::new()
            .add_userid("Mallory <mallory@example.org>")
            .add_signing_subkey()
            .generate()
            .unwrap();
        let ring = KeyRing::from_cert(other).unwrap();
        assert!(verify_detached(&sig, &ring, &b"payload"[..]).is_err());
    }

    #[test]
    fn signature_info_fields() {
        let (_cert, mut keypair) = signing_key();
        let sig = detached_signature(&mut keypair, b"payload");
        let info = signature_info(&sig).unwrap();
        assert_eq!(info.version, 4);
        assert!(info.created.is_some());
    }
}
