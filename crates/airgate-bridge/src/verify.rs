use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use x509_cert::Certificate;

use airgate_types::{decode_plist, SenderContactRecord};

const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
const ID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
const ID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");

/// Coarse CMS (PKCS#7) verification of the signed sender record.
///
/// "Coarse" means: the signer's signature over the signed attributes must
/// verify, the content digest must match, and when a root certificate is
/// configured some certificate in the bundle must be issued by it. No
/// revocation, validity-window or contact checks; the bridge runs in
/// Everyone mode and only wants to know the blob is a plausible Apple-signed
/// record before decoding it.
pub struct RecordVerifier {
    root: Option<Certificate>,
}

impl RecordVerifier {
    /// Load the trust anchor from disk. A missing or unreadable file leaves
    /// signature verification structural-only, with a startup warning.
    pub fn load(path: Option<&Path>) -> Self {
        let root = path.and_then(|p| match std::fs::read(p) {
            Ok(bytes) => match Certificate::from_der(&bytes) {
                Ok(cert) => {
                    debug!("apple root loaded from {}", p.display());
                    Some(cert)
                }
                Err(e) => {
                    warn!("apple root at {} unparseable ({e}); chain checks off", p.display());
                    None
                }
            },
            Err(e) => {
                warn!("apple root at {} unreadable ({e}); chain checks off", p.display());
                None
            }
        });
        if root.is_none() {
            warn!("sender records will be verified without a trust anchor");
        }
        Self { root }
    }

    /// Verify a `SenderRecordData` blob and decode the contact record inside.
    pub fn verify(&self, record: &[u8]) -> Result<SenderContactRecord> {
        let content_info = ContentInfo::from_der(record).context("not a CMS structure")?;
        ensure!(
            content_info.content_type == ID_SIGNED_DATA,
            "unexpected CMS content type {}",
            content_info.content_type
        );
        let signed: SignedData = content_info
            .content
            .decode_as()
            .context("malformed SignedData")?;

        let econtent = signed
            .encap_content_info
            .econtent
            .as_ref()
            .context("record has no encapsulated content")?;
        let payload: OctetString = econtent
            .decode_as()
            .context("malformed encapsulated content")?;
        let payload = payload.as_bytes().to_vec();

        let certs: Vec<&Certificate> = signed
            .certificates
            .as_ref()
            .map(|set| {
                set.0
                    .iter()
                    .filter_map(|choice| match choice {
                        CertificateChoices::Certificate(cert) => Some(cert),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        ensure!(!certs.is_empty(), "record carries no certificates");

        let signer = signed
            .signer_infos
            .0
            .iter()
            .next()
            .context("record has no signer info")?;
        let cert = find_signer_cert(&certs, signer)?;

        check_signature(signer, cert, &payload)?;

        if let Some(root) = &self.root {
            let root_subject = root.tbs_certificate.subject.to_der()?;
            let chained = certs.iter().any(|c| {
                c.tbs_certificate
                    .issuer
                    .to_der()
                    .map(|issuer| issuer == root_subject)
                    .unwrap_or(false)
            });
            ensure!(chained, "signer chain does not reach the configured root");
        }

        decode_plist(&payload).context("record payload is not a plist")
    }
}

fn find_signer_cert<'a>(
    certs: &[&'a Certificate],
    signer: &SignerInfo,
) -> Result<&'a Certificate> {
    if let SignerIdentifier::IssuerAndSerialNumber(isn) = &signer.sid {
        let issuer = isn.issuer.to_der()?;
        for cert in certs {
            if cert.tbs_certificate.serial_number == isn.serial_number
                && cert.tbs_certificate.issuer.to_der()? == issuer
            {
                return Ok(cert);
            }
        }
    }
    // Fall back to the leaf position; Apple records lead with it.
    Ok(certs[0])
}

/// Digest the content, compare against the messageDigest attribute, then
/// verify the RSA PKCS#1 v1.5 signature over the DER of the signed
/// attributes.
fn check_signature(signer: &SignerInfo, cert: &Certificate, payload: &[u8]) -> Result<()> {
    let digest_oid = signer.digest_alg.oid;
    let content_digest: Vec<u8> = match digest_oid {
        ID_SHA1 => Sha1::digest(payload).to_vec(),
        ID_SHA256 => Sha256::digest(payload).to_vec(),
        other => bail!("unsupported digest algorithm {other}"),
    };

    let signed_attrs = signer
        .signed_attrs
        .as_ref()
        .context("record has no signed attributes")?;

    let message_digest = signed_attrs
        .iter()
        .find(|attr| attr.oid == ID_MESSAGE_DIGEST)
        .context("signed attributes lack messageDigest")?;
    let claimed: OctetString = message_digest
        .values
        .iter()
        .next()
        .context("empty messageDigest attribute")?
        .decode_as()
        .context("malformed messageDigest attribute")?;
    ensure!(
        claimed.as_bytes() == content_digest.as_slice(),
        "content digest mismatch"
    );

    let attrs_der = signed_attrs.to_der()?;
    let (scheme, hashed): (Pkcs1v15Sign, Vec<u8>) = match digest_oid {
        ID_SHA1 => (Pkcs1v15Sign::new::<Sha1>(), Sha1::digest(&attrs_der).to_vec()),
        ID_SHA256 => (
            Pkcs1v15Sign::new::<Sha256>(),
            Sha256::digest(&attrs_der).to_vec(),
        ),
        other => bail!("unsupported digest algorithm {other}"),
    };

    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .context("unencodable signer key")?;
    let key = RsaPublicKey::from_public_key_der(&spki_der)
        .context("signer key is not RSA")?;

    let signature = signer.signature.as_bytes();
    key.verify(scheme, &hashed, signature)
        .context("signature verification failed")?;
    Ok(())
}
