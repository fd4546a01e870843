// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::client::K8sClient;
use crate::error::{K8sError, K8sResult};
use crate::types::Service;

const COMPONENT_SELECTOR: &str = "app.infrahq.com/component=connector";

/// Address a destination is reachable at, derived from the connector service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
	pub host: String,
	pub port: u16,
	pub cluster_ip: bool,
}

/// Find the connector's service, narrowed by the pod's instance labels.
pub async fn connector_service(
	client: &dyn K8sClient,
	namespace: &str,
	instance_labels: &[String],
) -> K8sResult<Service> {
	let mut selector = vec![COMPONENT_SELECTOR.to_string()];
	selector.extend(instance_labels.iter().cloned());
	client
		.find_service(namespace, &selector.join(","))
		.await?
		.ok_or_else(|| K8sError::NotFound {
			kind: "Service",
			name: "connector".into(),
		})
}

/// Host and port clients should use to reach `service`.
pub fn service_endpoint(service: &Service) -> K8sResult<ServiceEndpoint> {
	let spec = service.spec.as_ref().ok_or_else(|| K8sError::Endpoint {
		message: "service has no spec".into(),
	})?;
	let kind = spec.type_.as_deref().unwrap_or("ClusterIP");

	let host = match kind {
		"ClusterIP" => spec.cluster_ip.clone().unwrap_or_default(),
		"NodePort" | "LoadBalancer" => {
			let ingress = service
				.status
				.as_ref()
				.and_then(|s| s.load_balancer.as_ref())
				.and_then(|lb| lb.ingress.as_ref())
				.and_then(|ingress| ingress.first())
				.ok_or_else(|| K8sError::Endpoint {
					message: "load balancer has no ingress objects".into(),
				})?;
			ingress
				.hostname
				.clone()
				.filter(|h| !h.is_empty())
				.or_else(|| ingress.ip.clone())
				.unwrap_or_default()
		}
		other => {
			return Err(K8sError::Endpoint {
				message: format!("unsupported service type {other}"),
			})
		}
	};

	let port = spec
		.ports
		.as_ref()
		.and_then(|ports| ports.first())
		.ok_or_else(|| K8sError::Endpoint {
			message: "service has no ports".into(),
		})?
		.port;

	Ok(ServiceEndpoint {
		host,
		port: u16::try_from(port).map_err(|_| K8sError::Endpoint {
			message: format!("invalid service port {port}"),
		})?,
		cluster_ip: kind == "ClusterIP",
	})
}
