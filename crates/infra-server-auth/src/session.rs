// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Short-lived session JWTs signed with the registry's Ed25519 key.
//!
//! The keypair lives in the settings row as a private JWK (sealed at rest)
//! and a public JWK served at `/.well-known/jwks.json`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::{SigningKey, VerifyingKey};
use infra_common_config::SecretString;
use infra_server_api::Id;
use infra_server_db::{Settings, SettingsRepository};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::jwk::{
	AlgorithmParameters, CommonParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm,
	OctetKeyPairParameters, OctetKeyPairType, PublicKeyUse,
};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::access_key::generate_token;
use crate::error::{AuthError, Result};

pub const ISSUER: &str = "infra";

/// Tolerated clock difference when checking `iat`.
const CLOCK_SKEW_SECONDS: i64 = 60;
const NONCE_LENGTH: usize = 10;

/// The stored private form of the signing key.
#[derive(Serialize, Deserialize)]
struct PrivateJwk {
	kty: String,
	crv: String,
	kid: String,
	x: String,
	d: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
	pub iss: String,
	pub iat: i64,
	pub exp: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub machine: Option<String>,
	pub nonce: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub destination: String,
}

impl SessionClaims {
	/// Identities with an `@` are people; anything else is a machine.
	pub fn new(identity_name: &str, destination: &str, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
		let (email, machine) = if identity_name.contains('@') {
			(Some(identity_name.to_string()), None)
		} else {
			(None, Some(identity_name.to_string()))
		};
		Self {
			iss: ISSUER.to_string(),
			iat: issued_at.timestamp(),
			exp: (issued_at + ttl).timestamp(),
			email,
			machine,
			nonce: generate_token(NONCE_LENGTH),
			destination: destination.to_string(),
		}
	}

	pub fn subject(&self) -> Option<&str> {
		self.email.as_deref().or(self.machine.as_deref())
	}
}

fn key_id(verifying_key: &VerifyingKey) -> String {
	hex::encode(&Sha256::digest(verifying_key.to_bytes())[..8])
}

fn public_jwk(verifying_key: &VerifyingKey) -> Jwk {
	Jwk {
		common: CommonParameters {
			public_key_use: Some(PublicKeyUse::Signature),
			key_algorithm: Some(KeyAlgorithm::EdDSA),
			key_id: Some(key_id(verifying_key)),
			..Default::default()
		},
		algorithm: AlgorithmParameters::OctetKeyPair(OctetKeyPairParameters {
			key_type: OctetKeyPairType::OctetKeyPair,
			curve: EllipticCurve::Ed25519,
			x: BASE64URL.encode(verifying_key.to_bytes()),
		}),
	}
}

fn invalid(msg: impl Into<String>) -> AuthError {
	AuthError::InvalidToken(msg.into())
}

fn jwt_error(e: jsonwebtoken::errors::Error) -> AuthError {
	match e.kind() {
		JwtErrorKind::ExpiredSignature => AuthError::TokenExpired,
		_ => invalid(e.to_string()),
	}
}

pub struct SessionSigner {
	signing_key: SigningKey,
	key_id: String,
}

impl SessionSigner {
	pub fn generate() -> Self {
		Self::from_signing_key(SigningKey::generate(&mut OsRng))
	}

	fn from_signing_key(signing_key: SigningKey) -> Self {
		let key_id = key_id(&signing_key.verifying_key());
		Self { signing_key, key_id }
	}

	pub fn from_private_jwk(jwk: &SecretString) -> Result<Self> {
		let parsed: PrivateJwk = serde_json::from_str(jwk.expose())
			.map_err(|e| AuthError::SigningKey(format!("invalid private jwk: {e}")))?;
		if parsed.kty != "OKP" || parsed.crv != "Ed25519" {
			return Err(AuthError::SigningKey(format!(
				"unsupported key type {}/{}",
				parsed.kty, parsed.crv
			)));
		}

		let seed = Zeroizing::new(
			BASE64URL
				.decode(parsed.d.as_bytes())
				.map_err(|e| AuthError::SigningKey(format!("invalid private key encoding: {e}")))?,
		);
		let seed: Zeroizing<[u8; 32]> = Zeroizing::new(
			seed.as_slice()
				.try_into()
				.map_err(|_| AuthError::SigningKey(format!("private key must be 32 bytes, got {}", seed.len())))?,
		);
		let signer = Self::from_signing_key(SigningKey::from_bytes(&seed));

		if BASE64URL.encode(signer.verifying_key().to_bytes()) != parsed.x {
			return Err(AuthError::SigningKey(
				"private jwk does not match its public key".to_string(),
			));
		}
		Ok(signer)
	}

	pub fn to_private_jwk(&self) -> Result<SecretString> {
		let jwk = PrivateJwk {
			kty: "OKP".to_string(),
			crv: "Ed25519".to_string(),
			kid: self.key_id.clone(),
			x: BASE64URL.encode(self.verifying_key().to_bytes()),
			d: BASE64URL.encode(self.signing_key.to_bytes()),
		};
		Ok(SecretString::new(serde_json::to_string(&jwk)?))
	}

	pub fn key_id(&self) -> &str {
		&self.key_id
	}

	pub fn verifying_key(&self) -> VerifyingKey {
		self.signing_key.verifying_key()
	}

	pub fn public_jwk(&self) -> Jwk {
		public_jwk(&self.verifying_key())
	}

	pub fn jwks(&self) -> JwkSet {
		JwkSet {
			keys: vec![self.public_jwk()],
		}
	}

	pub fn verifier(&self) -> SessionVerifier {
		SessionVerifier {
			// EdDSA decoding keys take the raw 32-byte public key
			key: DecodingKey::from_ed_der(self.verifying_key().as_bytes()),
			key_id: self.key_id.clone(),
		}
	}

	pub fn sign(&self, claims: &SessionClaims) -> Result<String> {
		let der = self
			.signing_key
			.to_pkcs8_der()
			.map_err(|e| AuthError::SigningKey(format!("encoding private key: {e}")))?;
		let mut header = Header::new(Algorithm::EdDSA);
		header.kid = Some(self.key_id.clone());
		encode(&header, claims, &EncodingKey::from_ed_der(der.as_bytes()))
			.map_err(|e| AuthError::SigningKey(format!("signing session token: {e}")))
	}

	/// Mints a token for `identity_name` scoped to `destination`.
	#[tracing::instrument(skip(self), fields(kid = %self.key_id))]
	pub fn issue(
		&self,
		identity_name: &str,
		destination: &str,
		ttl: Duration,
	) -> Result<(String, DateTime<Utc>)> {
		let now = Utc::now();
		let claims = SessionClaims::new(identity_name, destination, now, ttl);
		let expires = DateTime::from_timestamp(claims.exp, 0)
			.ok_or_else(|| AuthError::InvalidRequest("token lifetime out of range".to_string()))?;
		Ok((self.sign(&claims)?, expires))
	}
}

impl std::fmt::Debug for SessionSigner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionSigner")
			.field("signing_key", &"[REDACTED]")
			.field("key_id", &self.key_id)
			.finish()
	}
}

/// Verifies tokens against a public key only.
#[derive(Clone)]
pub struct SessionVerifier {
	key: DecodingKey,
	key_id: String,
}

impl SessionVerifier {
	pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
		match &jwk.algorithm {
			AlgorithmParameters::OctetKeyPair(OctetKeyPairParameters {
				curve: EllipticCurve::Ed25519,
				..
			}) => {}
			_ => return Err(AuthError::SigningKey("jwk is not an Ed25519 key".to_string())),
		}
		let key_id = jwk
			.common
			.key_id
			.clone()
			.ok_or_else(|| AuthError::SigningKey("jwk has no kid".to_string()))?;
		let key = DecodingKey::from_jwk(jwk)
			.map_err(|e| AuthError::SigningKey(format!("invalid public key: {e}")))?;
		Ok(Self { key, key_id })
	}

	pub fn verify(&self, token: &str) -> Result<SessionClaims> {
		let header = decode_header(token).map_err(jwt_error)?;
		match &header.kid {
			Some(kid) if kid == &self.key_id => {}
			Some(_) => return Err(invalid("token signed by unknown key")),
			None => return Err(invalid("token missing kid header")),
		}

		let mut validation = Validation::new(Algorithm::EdDSA);
		validation.leeway = 0;
		validation.set_issuer(&[ISSUER]);
		validation.set_required_spec_claims(&["exp", "iss"]);
		let claims = decode::<SessionClaims>(token, &self.key, &validation)
			.map_err(jwt_error)?
			.claims;

		if claims.iat > Utc::now().timestamp() + CLOCK_SKEW_SECONDS {
			return Err(invalid("iat is in the future"));
		}
		Ok(claims)
	}
}

impl std::fmt::Debug for SessionVerifier {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionVerifier")
			.field("key_id", &self.key_id)
			.finish()
	}
}

/// Returns the organization settings, creating them with a fresh signing key
/// on first start.
#[tracing::instrument(skip(settings))]
pub async fn load_or_create_settings(
	settings: &SettingsRepository,
) -> Result<(Settings, SessionSigner)> {
	let stored = match settings.get_settings().await? {
		Some(existing) => existing,
		None => {
			let signer = SessionSigner::generate();
			let fresh = Settings {
				organization_id: Id::generate(),
				private_jwk: signer.to_private_jwk()?,
				public_jwk: serde_json::to_string(&signer.public_jwk())?,
			};
			settings.create_settings(&fresh).await?
		}
	};

	let signer = SessionSigner::from_private_jwk(&stored.private_jwk)?;
	tracing::debug!(organization_id = %stored.organization_id, kid = %signer.key_id(), "session signing key loaded");
	Ok((stored, signer))
}


#[cfg(test)]
mod tests {
	use super::*;
	use infra_server_db::testing::create_test_store;

	#[test]
	fn sign_then_verify() {
		let signer = SessionSigner::generate();
		let (token, expires) = signer
			.issue("alice@example.com", "c1", Duration::minutes(5))
			.unwrap();
		let claims = signer.verifier().verify(&token).unwrap();

		assert_eq!(claims.iss, "infra");
		assert_eq!(claims.email.as_deref(), Some("alice@example.com"));
		assert!(claims.machine.is_none());
		assert_eq!(claims.destination, "c1");
		assert_eq!(claims.exp, expires.timestamp());
		assert_eq!(claims.nonce.len(), NONCE_LENGTH);
	}

	#[test]
	fn header_names_algorithm_and_key() {
		let signer = SessionSigner::generate();
		let (token, _) = signer.issue("connector", "", Duration::minutes(5)).unwrap();
		let header = decode_header(&token).unwrap();
		assert_eq!(header.alg, Algorithm::EdDSA);
		assert_eq!(header.typ.as_deref(), Some("JWT"));
		assert_eq!(header.kid.as_deref(), Some(signer.key_id()));
	}

	#[test]
	fn machine_identities_use_machine_claim() {
		let claims = SessionClaims::new("connector", "", Utc::now(), Duration::minutes(5));
		assert_eq!(claims.machine.as_deref(), Some("connector"));
		assert!(claims.email.is_none());
		assert_eq!(claims.subject(), Some("connector"));

		let json = serde_json::to_value(&claims).unwrap();
		assert!(json.get("email").is_none());
		assert!(json.get("destination").is_none());
	}

	#[test]
	fn expired_token_is_rejected() {
		let signer = SessionSigner::generate();
		let issued = Utc::now() - Duration::minutes(10);
		let claims = SessionClaims::new("bob@example.com", "c1", issued, Duration::minutes(5));
		let token = signer.sign(&claims).unwrap();
		assert!(matches!(
			signer.verifier().verify(&token),
			Err(AuthError::TokenExpired)
		));
	}

	#[test]
	fn foreign_issuer_is_rejected() {
		let signer = SessionSigner::generate();
		let mut claims = SessionClaims::new("bob@example.com", "c1", Utc::now(), Duration::minutes(5));
		claims.iss = "someone-else".to_string();
		let token = signer.sign(&claims).unwrap();
		assert!(matches!(
			signer.verifier().verify(&token),
			Err(AuthError::InvalidToken(_))
		));
	}

	#[test]
	fn token_from_another_key_is_rejected() {
		let a = SessionSigner::generate();
		let b = SessionSigner::generate();
		let (token, _) = a.issue("alice@example.com", "c1", Duration::minutes(5)).unwrap();
		let err = b.verifier().verify(&token).unwrap_err();
		assert_eq!(err.status_code(), 401);
	}

	#[test]
	fn tampered_claims_fail_signature() {
		let signer = SessionSigner::generate();
		let (token, _) = signer
			.issue("alice@example.com", "c1", Duration::minutes(5))
			.unwrap();
		let parts: Vec<&str> = token.split('.').collect();
		let forged = SessionClaims::new("mallory@example.com", "c1", Utc::now(), Duration::hours(1));
		let forged_b64 = BASE64URL.encode(serde_json::to_vec(&forged).unwrap());
		let tampered = format!("{}.{}.{}", parts[0], forged_b64, parts[2]);
		assert!(matches!(
			signer.verifier().verify(&tampered),
			Err(AuthError::InvalidToken(_))
		));
	}

	#[test]
	fn malformed_tokens_are_rejected() {
		let verifier = SessionSigner::generate().verifier();
		for token in ["", "a.b", "a.b.c.d", "!!.!!.!!"] {
			assert!(verifier.verify(token).is_err(), "{token:?}");
		}
	}

	#[test]
	fn private_jwk_round_trips() {
		let signer = SessionSigner::generate();
		let restored = SessionSigner::from_private_jwk(&signer.to_private_jwk().unwrap()).unwrap();
		assert_eq!(restored.key_id(), signer.key_id());
		assert_eq!(restored.verifying_key(), signer.verifying_key());
	}

	#[test]
	fn jwks_key_verifies_signer_tokens() {
		let signer = SessionSigner::generate();
		let jwks = signer.jwks();
		assert_eq!(jwks.keys.len(), 1);

		let published = serde_json::to_value(&jwks.keys[0]).unwrap();
		assert_eq!(published["kty"], "OKP");
		assert_eq!(published["crv"], "Ed25519");
		assert_eq!(published["alg"], "EdDSA");
		assert_eq!(published["use"], "sig");
		assert_eq!(published["kid"], signer.key_id());

		let verifier = SessionVerifier::from_jwk(jwks.find(signer.key_id()).unwrap()).unwrap();
		let (token, _) = signer.issue("connector", "c1", Duration::minutes(5)).unwrap();
		assert_eq!(verifier.verify(&token).unwrap().machine.as_deref(), Some("connector"));
	}

	#[test]
	fn published_key_decodes_with_a_plain_jwt_decoder() {
		let signer = SessionSigner::generate();
		let (token, _) = signer
			.issue("alice@example.com", "c1", Duration::minutes(5))
			.unwrap();
		let jwk = signer.public_jwk();
		let AlgorithmParameters::OctetKeyPair(params) = &jwk.algorithm else {
			panic!("expected an OKP key");
		};

		let mut validation = Validation::new(Algorithm::EdDSA);
		validation.set_issuer(&[ISSUER]);
		let decoded = decode::<serde_json::Value>(
			&token,
			&DecodingKey::from_ed_components(&params.x).unwrap(),
			&validation,
		)
		.unwrap();
		assert_eq!(decoded.claims["email"], "alice@example.com");
		assert_eq!(decoded.claims["destination"], "c1");
	}

	#[test]
	fn debug_does_not_leak_private_key() {
		let signer = SessionSigner::generate();
		let debug = format!("{signer:?}");
		assert!(debug.contains("[REDACTED]"));
		let jwk = signer.to_private_jwk().unwrap();
		assert_eq!(format!("{jwk:?}"), "Secret(\"[REDACTED]\")");
	}

	#[tokio::test]
	async fn settings_are_created_once() {
		let store = create_test_store().await;
		let (first, signer_a) = load_or_create_settings(&store.settings).await.unwrap();
		let (second, signer_b) = load_or_create_settings(&store.settings).await.unwrap();
		assert_eq!(first.organization_id, second.organization_id);
		assert_eq!(signer_a.key_id(), signer_b.key_id());

		let public: Jwk = serde_json::from_str(&second.public_jwk).unwrap();
		assert_eq!(public.common.key_id.as_deref(), Some(signer_b.key_id()));
	}
}
