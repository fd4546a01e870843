// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! reqwest builders with the infra User-Agent.

use infra_common_version::user_agent;
use reqwest::{Certificate, Client, ClientBuilder};

/// Client builder tagged with `infra/{component}/...`.
pub fn builder(component: &str) -> ClientBuilder {
	Client::builder().user_agent(user_agent(component))
}

/// Trust settings for talking to a registry behind a private CA.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
	/// PEM bundle added to the trust roots.
	pub trusted_certificate: Option<String>,
	pub skip_verify: bool,
}

pub fn builder_with_tls(component: &str, tls: &TlsOptions) -> reqwest::Result<ClientBuilder> {
	let mut builder = builder(component);
	if let Some(pem) = &tls.trusted_certificate {
		for cert in Certificate::from_pem_bundle(pem.as_bytes())? {
			builder = builder.add_root_certificate(cert);
		}
	}
	if tls.skip_verify {
		tracing::warn!("TLS verification disabled for registry client");
		builder = builder.danger_accept_invalid_certs(true);
	}
	Ok(builder)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_builder_builds() {
		assert!(builder("server").build().is_ok());
	}

	#[test]
	fn skip_verify_builds() {
		let tls = TlsOptions {
			trusted_certificate: None,
			skip_verify: true,
		};
		assert!(builder_with_tls("connector", &tls).unwrap().build().is_ok());
	}

	#[test]
	fn garbage_certificate_is_rejected_or_empty() {
		let tls = TlsOptions {
			trusted_certificate: Some("not a pem".to_string()),
			skip_verify: false,
		};
		// A bundle without PEM blocks yields no certificates.
		if let Ok(builder) = builder_with_tls("connector", &tls) {
			assert!(builder.build().is_ok());
		}
	}
}
