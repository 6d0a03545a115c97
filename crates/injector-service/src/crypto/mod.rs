use crate::errors::Error;
use crate::models::{IdentityClaims, JsonWebKey, SigningKeyPair};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::{SecureRandom, SystemRandom};
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::instrument;

/// RSA modulus size for generated signing keys.
const RSA_KEY_BITS: usize = 2048;

/// Random bytes backing a freshly minted `kid`.
const KID_RANDOM_BYTES: usize = 20;

/// Mint a key identifier from fresh random material.
///
/// The identifier is independent of the key encoding, so re-encoding a key
/// never changes its identity. Lowercase hex keeps it usable inside
/// DNS-1123 Secret names.
fn generate_kid() -> Result<String, Error> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; KID_RANDOM_BYTES];
    rng.fill(&mut bytes)
        .map_err(|_| Error::KeyMaterial("random generation failed".to_string()))?;
    Ok(hex::encode(bytes))
}

/// Generate a 2048-bit RSA signing key pair with a freshly minted `kid`.
#[instrument(skip_all)]
pub fn generate_key_pair() -> Result<SigningKeyPair, Error> {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| Error::KeyMaterial(format!("RSA key generation failed: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| Error::KeyMaterial(format!("private key encoding failed: {e}")))?;
    let public_key_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| Error::KeyMaterial(format!("public key encoding failed: {e}")))?;

    Ok(SigningKeyPair {
        kid: generate_kid()?,
        public_key_pem,
        private_key_pem: SecretString::from(private_key_pem.to_string()),
    })
}

/// Check that a persisted pair's encodings parse into usable signing and
/// verification keys. Fails with [`Error::KeyMaterial`]; the caller treats
/// this as fatal at startup.
pub fn validate_key_pair(pair: &SigningKeyPair) -> Result<(), Error> {
    if pair.kid.is_empty() {
        return Err(Error::KeyMaterial(
            "persisted key pair has an empty kid".to_string(),
        ));
    }

    EncodingKey::from_rsa_pem(pair.private_key_pem.expose_secret().as_bytes()).map_err(|e| {
        Error::KeyMaterial(format!("private key for '{}' is invalid: {e}", pair.kid))
    })?;
    DecodingKey::from_rsa_pem(pair.public_key_pem.as_bytes()).map_err(|e| {
        Error::KeyMaterial(format!("public key for '{}' is invalid: {e}", pair.kid))
    })?;
    // The JWKS projection needs the raw modulus/exponent as well.
    RsaPublicKey::from_public_key_pem(&pair.public_key_pem).map_err(|e| {
        Error::KeyMaterial(format!("public key for '{}' is not SPKI: {e}", pair.kid))
    })?;

    Ok(())
}

/// Sign identity claims with the given pair, embedding its `kid` in the
/// token header.
#[instrument(skip_all, fields(kid = %pair.kid))]
pub fn sign_claims(claims: &IdentityClaims, pair: &SigningKeyPair) -> Result<String, Error> {
    let encoding_key = EncodingKey::from_rsa_pem(pair.private_key_pem.expose_secret().as_bytes())
        .map_err(|e| {
        Error::KeyMaterial(format!("private key for '{}' is invalid: {e}", pair.kid))
    })?;

    let mut header = Header::new(Algorithm::RS256);
    header.typ = Some("JWT".to_string());
    header.kid = Some(pair.kid.clone());

    encode(&header, claims, &encoding_key)
        .map_err(|e| Error::KeyMaterial(format!("JWT signing failed: {e}")))
}

/// Verify a token's signature against one pair and decode its claims.
///
/// Expiry is NOT checked here: callers decide whether a stale-but-authentic
/// token is an error or a refresh trigger. Only RS256 is accepted, so a
/// header advertising another algorithm fails signature verification.
#[instrument(skip_all, fields(kid = %pair.kid))]
pub fn verify_with_key(token: &str, pair: &SigningKeyPair) -> Result<IdentityClaims, Error> {
    let decoding_key = DecodingKey::from_rsa_pem(pair.public_key_pem.as_bytes()).map_err(|e| {
        Error::KeyMaterial(format!("public key for '{}' is invalid: {e}", pair.kid))
    })?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.set_required_spec_claims::<&str>(&[]);

    let token_data = decode::<IdentityClaims>(token, &decoding_key, &validation)
        .map_err(|e| Error::Signature(e.to_string()))?;

    Ok(token_data.claims)
}

/// Project a pair's public half into RFC 7517 JWK form.
pub fn public_jwk(pair: &SigningKeyPair) -> Result<JsonWebKey, Error> {
    let public_key = RsaPublicKey::from_public_key_pem(&pair.public_key_pem).map_err(|e| {
        Error::KeyMaterial(format!("public key for '{}' is not SPKI: {e}", pair.kid))
    })?;

    Ok(JsonWebKey {
        kid: pair.kid.clone(),
        kty: "RSA".to_string(),
        n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        use_: "sig".to_string(),
        alg: "RS256".to_string(),
    })
}
