//! # Document Signer
//!
//! XMLDSig enveloped signatures for documents (`infNFe`), events
//! (`infEvento`) and voiding requests (`infInut`).
//!
//! ## Signing Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  <NFe xmlns=NS><infNFe Id="NFe…">…</infNFe>[<infNFeSupl>…]</NFe>        │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │  1. extract infNFe verbatim, add inherited xmlns     (C14N 1.0)        │
//! │  2. DigestValue  = base64(SHA-1(canonical infNFe))                      │
//! │  3. SignedInfo   = C14N + RSA-SHA1 + Reference(#Id, DigestValue)        │
//! │  4. SignatureValue = base64(RSA-SHA1(canonical SignedInfo))             │
//! │  5. <Signature> (with X509Certificate) inserted before </NFe>           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The assembler writes canonical XML, so canonicalizing the signed element
//! only means adding the namespace declaration it inherits from its parent.
//! RSA PKCS#1 v1.5 is deterministic: the same input and key always produce
//! the same bytes.

use base64::Engine;
use openssl::hash::MessageDigest;
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509Ref;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::certificate::SigningIdentity;
use crate::error::{IssueError, IssueResult};
use crate::xml::{attribute_of, extract_element, text_of, with_namespace, XmlWriter};
use nfe_core::NFE_NAMESPACE;

pub const DSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";
const C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
const ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const SHA1_DIGEST: &str = "http://www.w3.org/2000/09/xmldsig#sha1";

/// Which element carries the signed identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedRoot {
    /// `infNFe`, inside `NFe`.
    Document,
    /// `infEvento`, inside `evento`.
    Event,
    /// `infInut`, inside `inutNFe`.
    Voiding,
}

impl SignedRoot {
    pub const fn element(&self) -> &'static str {
        match self {
            SignedRoot::Document => "infNFe",
            SignedRoot::Event => "infEvento",
            SignedRoot::Voiding => "infInut",
        }
    }
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn signing_error(context: &str, err: impl std::fmt::Display) -> IssueError {
    IssueError::Signing(format!("{}: {}", context, err))
}

/// Canonical form of the signed element and its `Id`.
fn canonical_root<'a>(xml: &'a str, root: SignedRoot) -> IssueResult<(String, String)> {
    let element = extract_element(xml, root.element())
        .ok_or_else(|| IssueError::Signing(format!("<{}> not found", root.element())))?;
    let id = attribute_of(element, root.element(), "Id")
        .ok_or_else(|| IssueError::Signing(format!("<{}> has no Id", root.element())))?;
    let canonical = with_namespace(element, NFE_NAMESPACE)
        .ok_or_else(|| IssueError::Signing("signed element is not well formed".into()))?;
    Ok((canonical, id))
}

/// `SignedInfo` without the namespace declaration, as embedded.
fn signed_info(reference_id: &str, digest: &str) -> String {
    let mut w = XmlWriter::new();
    let uri = format!("#{}", reference_id);
    w.open("SignedInfo", &[])
        .open("CanonicalizationMethod", &[("Algorithm", C14N)])
        .close("CanonicalizationMethod")
        .open("SignatureMethod", &[("Algorithm", RSA_SHA1)])
        .close("SignatureMethod")
        .open("Reference", &[("URI", &uri)])
        .open("Transforms", &[])
        .open("Transform", &[("Algorithm", ENVELOPED)])
        .close("Transform")
        .open("Transform", &[("Algorithm", C14N)])
        .close("Transform")
        .close("Transforms")
        .open("DigestMethod", &[("Algorithm", SHA1_DIGEST)])
        .close("DigestMethod")
        .leaf("DigestValue", digest)
        .close("Reference")
        .close("SignedInfo");
    w.finish()
}

/// Signs `xml` and returns it with the `Signature` block appended to the
/// signed element's parent.
pub fn sign(xml: &str, root: SignedRoot, identity: &SigningIdentity) -> IssueResult<String> {
    let (canonical, id) = canonical_root(xml, root)?;
    let digest = b64(&Sha1::digest(canonical.as_bytes()));

    let info = signed_info(&id, &digest);
    let canonical_info = with_namespace(&info, DSIG_NAMESPACE)
        .ok_or_else(|| IssueError::Signing("SignedInfo is not well formed".into()))?;

    let mut signer = Signer::new(MessageDigest::sha1(), &identity.key)
        .map_err(|e| signing_error("signer", e))?;
    signer
        .update(canonical_info.as_bytes())
        .map_err(|e| signing_error("signer", e))?;
    let signature = signer
        .sign_to_vec()
        .map_err(|e| signing_error("signature", e))?;
    let certificate = identity
        .certificate_base64()
        .map_err(|e| signing_error("certificate", e))?;

    let mut block = XmlWriter::new();
    block
        .open("Signature", &[("xmlns", DSIG_NAMESPACE)])
        .raw(&info)
        .leaf("SignatureValue", &b64(&signature))
        .open("KeyInfo", &[])
        .open("X509Data", &[])
        .leaf("X509Certificate", &certificate)
        .close("X509Data")
        .close("KeyInfo")
        .close("Signature");
    let block = block.finish();

    let insert_at = xml
        .rfind("</")
        .ok_or_else(|| IssueError::Signing("document has no closing tag".into()))?;
    let mut signed = String::with_capacity(xml.len() + block.len());
    signed.push_str(&xml[..insert_at]);
    signed.push_str(&block);
    signed.push_str(&xml[insert_at..]);

    debug!(reference = %id, digest = %digest, "Document signed");
    Ok(signed)
}

/// Checks digest and signature of a signed document against `certificate`.
pub fn verify(signed_xml: &str, root: SignedRoot, certificate: &X509Ref) -> IssueResult<bool> {
    let (canonical, id) = canonical_root(signed_xml, root)?;
    let signature_block = extract_element(signed_xml, "Signature")
        .ok_or_else(|| IssueError::Signing("no Signature".into()))?;
    let info = extract_element(signature_block, "SignedInfo")
        .ok_or_else(|| IssueError::Signing("no SignedInfo".into()))?;

    let uri = attribute_of(info, "Reference", "URI").unwrap_or_default();
    if uri != format!("#{}", id) {
        return Ok(false);
    }
    let digest = text_of(info, "DigestValue").unwrap_or_default();
    if digest != b64(&Sha1::digest(canonical.as_bytes())) {
        return Ok(false);
    }

    let value = text_of(signature_block, "SignatureValue").unwrap_or_default();
    let signature = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| signing_error("SignatureValue", e))?;
    let canonical_info = with_namespace(info, DSIG_NAMESPACE)
        .ok_or_else(|| IssueError::Signing("SignedInfo is not well formed".into()))?;

    let public_key = certificate
        .public_key()
        .map_err(|e| signing_error("public key", e))?;
    let mut verifier = Verifier::new(MessageDigest::sha1(), &public_key)
        .map_err(|e| signing_error("verifier", e))?;
    verifier
        .update(canonical_info.as_bytes())
        .map_err(|e| signing_error("verifier", e))?;
    verifier
        .verify(&signature)
        .map_err(|e| signing_error("verifier", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::identity;

    const UNSIGNED: &str = "<NFe xmlns=\"http://www.portalfiscal.inf.br/nfe\"><infNFe Id=\"NFe35240311222333000181650010000000421123456780\" versao=\"4.00\"><ide><cUF>35</cUF></ide></infNFe></NFe>";

    #[test]
    fn test_sign_embeds_signature_after_root() {
        let identity = identity();
        let signed = sign(UNSIGNED, SignedRoot::Document, &identity).unwrap();

        assert!(signed.starts_with(
            "<NFe xmlns=\"http://www.portalfiscal.inf.br/nfe\"><infNFe Id=\"NFe3524"
        ));
        assert!(signed.contains("</infNFe><Signature xmlns=\"http://www.w3.org/2000/09/xmldsig#\">"));
        assert!(signed.ends_with("</Signature></NFe>"));
        assert!(signed.contains("<Reference URI=\"#NFe35240311222333000181650010000000421123456780\">"));
        assert!(signed.contains("<X509Certificate>"));
    }

    #[test]
    fn test_signature_verifies() {
        let identity = identity();
        let signed = sign(UNSIGNED, SignedRoot::Document, &identity).unwrap();
        assert!(verify(&signed, SignedRoot::Document, &identity.certificate).unwrap());

        let tampered = signed.replace("<cUF>35</cUF>", "<cUF>31</cUF>");
        assert!(!verify(&tampered, SignedRoot::Document, &identity.certificate).unwrap());
    }

    #[test]
    fn test_signing_is_deterministic() {
        let identity = identity();
        let a = sign(UNSIGNED, SignedRoot::Document, &identity).unwrap();
        let b = sign(UNSIGNED, SignedRoot::Document, &identity).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_covers_inherited_namespace() {
        let (canonical, id) = canonical_root(UNSIGNED, SignedRoot::Document).unwrap();
        assert!(canonical.starts_with(
            "<infNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" Id=\"NFe"
        ));
        assert_eq!(id, "NFe35240311222333000181650010000000421123456780");
    }

    #[test]
    fn test_voiding_request_signed_inside_inut() {
        let identity = identity();
        let request = "<inutNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><infInut Id=\"ID35241122233300018165001000000005000000009\"><tpAmb>2</tpAmb><xServ>INUTILIZAR</xServ></infInut></inutNFe>";
        let signed = sign(request, SignedRoot::Voiding, &identity).unwrap();
        assert!(signed.contains("</infInut><Signature"));
        assert!(signed.ends_with("</Signature></inutNFe>"));
        assert!(verify(&signed, SignedRoot::Voiding, &identity.certificate).unwrap());
    }

    #[test]
    fn test_missing_root_is_signing_error() {
        let identity = identity();
        let err = sign("<evento></evento>", SignedRoot::Event, &identity).unwrap_err();
        assert!(matches!(err, IssueError::Signing(_)));
    }
}
