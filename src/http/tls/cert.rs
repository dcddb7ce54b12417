//! Certificate handling
//!
//! Extracts identities from X.509 certificates and generates the ephemeral
//! self-signed certificate used when no certificate is configured.

use super::config::TlsError;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::SslRef;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509Builder, X509NameBuilder, X509NameRef, X509};

/// Get the Common Name from an X.509 name
pub fn common_name(name: &X509NameRef) -> Option<String> {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
}

/// Identity hint from the client certificate, if one was presented
pub fn peer_identity(ssl: &SslRef) -> Option<String> {
    ssl.peer_certificate()
        .and_then(|cert| common_name(cert.subject_name()))
}

/// Security strength of the negotiated cipher in bits
pub fn cipher_strength(ssl: &SslRef) -> u32 {
    ssl.current_cipher()
        .map(|c| c.bits().secret.max(0) as u32)
        .unwrap_or(0)
}

/// Generate a self-signed P-256 certificate for `cn`, valid for one year
pub fn self_signed(cn: &str) -> Result<(X509, PKey<Private>), TlsError> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, cn)
        .map_err(|e| TlsError::Certificate(format!("Invalid common name {}: {}", cn, e)))?;
    let name = name.build();

    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, false)?;

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&key)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(365)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    let san = SubjectAlternativeName::new()
        .dns(cn)
        .build(&builder.x509v3_context(None, None))?;
    builder.append_extension(san)?;
    builder.sign(&key, MessageDigest::sha256())?;

    Ok((builder.build(), key))
}
