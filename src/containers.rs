//! Container listing over the cluster REST API.
//!
//! [`ContainerLister`] wraps `reqwest::Client` with the relay's bearer token
//! and TLS policy. With a pod name it reads that pod; without one it reads
//! every pod in the namespace and flattens their containers.
//!
//! Non-2xx responses are parsed for the `message` field of the Kubernetes
//! `Status` body. If parsing fails, the raw body is returned instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dialer::Credentials;
use crate::endpoint::ClusterEndpoint;
use crate::error::RelayError;

/// One container of one pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub namespace: String,
    pub pod: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Error)]
pub enum ListError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Endpoint(#[from] RelayError),
}

impl ListError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

#[derive(Deserialize)]
struct Pod {
    metadata: PodMetadata,
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Deserialize)]
struct PodMetadata {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Default, Deserialize)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Deserialize)]
struct Container {
    name: String,
    image: Option<String>,
}

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

impl Pod {
    fn into_descriptors(self, namespace: &str) -> impl Iterator<Item = ContainerDescriptor> {
        let namespace = self.metadata.namespace.unwrap_or_else(|| namespace.to_string());
        let pod = self.metadata.name;
        self.spec
            .containers
            .into_iter()
            .map(move |c| ContainerDescriptor {
                namespace: namespace.clone(),
                pod: pod.clone(),
                name: c.name,
                image: c.image,
            })
    }
}

/// Containers of a single `Pod` object.
pub fn parse_pod(namespace: &str, body: &[u8]) -> Result<Vec<ContainerDescriptor>, ListError> {
    let pod: Pod = serde_json::from_slice(body)?;
    Ok(pod.into_descriptors(namespace).collect())
}

/// Containers of every pod in a `PodList`, in list order.
pub fn parse_pod_list(
    namespace: &str,
    body: &[u8],
) -> Result<Vec<ContainerDescriptor>, ListError> {
    let list: PodList = serde_json::from_slice(body)?;
    Ok(list
        .items
        .into_iter()
        .flat_map(|pod| pod.into_descriptors(namespace))
        .collect())
}

/// REST client for pod container listings.
pub struct ContainerLister {
    http: reqwest::Client,
    cluster: ClusterEndpoint,
    token: String,
}

impl ContainerLister {
    pub fn new(cluster: ClusterEndpoint, credentials: &Credentials) -> Result<Self, ListError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30));
        if let Some(pem) = &credentials.tls.ca_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }
        if credentials.tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self {
            http: builder.build()?,
            cluster,
            token: credentials.bearer_token.clone(),
        })
    }

    /// `GET api/v1/namespaces/{ns}/pods[/{pod}]`, flattened to containers.
    pub async fn list_containers(
        &self,
        namespace: &str,
        pod: Option<&str>,
    ) -> Result<Vec<ContainerDescriptor>, ListError> {
        let mut segments = vec!["api", "v1", "namespaces", namespace, "pods"];
        segments.extend(pod);
        let url = self.cluster.rest_url(segments)?;
        debug!(%namespace, pod = pod.unwrap_or("*"), "Containers: GET {}", url.path());

        let mut request = self.http.get(url);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["message"].as_str().map(String::from))
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(ListError::Status {
                status: status.as_u16(),
                message,
            });
        }

        match pod {
            Some(_) => parse_pod(namespace, &body),
            None => parse_pod_list(namespace, &body),
        }
    }
}
