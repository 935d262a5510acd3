//! NexentaEdge management REST client.
//!
//! [`NedgeClient`] implements [`ClusterApi`] over the cluster's HTTP API
//! with basic authentication. Responses are decoded into the typed
//! envelopes below exactly once; the rest of the crate only sees
//! [`NedgeService`] and [`NedgeNfsVolume`].
//!
//! # Error mapping
//!
//! | Response | Error |
//! |---|---|
//! | body `code` = `RT_ERR_EXISTS` | [`NdnfsError::Conflict`] |
//! | HTTP 404 | [`NdnfsError::NotFound`] |
//! | body `code` = `EINVAL`, other HTTP status >= 400 | [`NdnfsError::Backend`] |

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::cluster::ClusterApi;
use crate::error::NdnfsError;
use crate::types::{
    CHUNK_SIZE_BUCKET_OPTION, NedgeNfsVolume, NedgeService, SERVICE_KIND_NFS, SERVICE_STATUS_ENABLED,
};

const CODE_EXISTS: &str = "RT_ERR_EXISTS";
const CODE_INVALID: &str = "EINVAL";
const ACL_PARAM_PREFIX: &str = "X-NFS-ACL-";
const NETWORK_KEY_PREFIX: &str = "X-Container-Network-";
const CLIENT_NET_PREFIX: &str = "client-net --ip ";

/// Connection settings for [`NedgeClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NedgeClientConfig {
    /// Management API host name or address.
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl NedgeClientConfig {
    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    fn base_url(&self) -> String {
        format!("http://{}:{}/", self.address, self.port)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Outer envelope of every management API response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: Option<T>,
}

/// Error fields the API may set on any response.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SystemStatus {
    #[serde(rename = "restWorker")]
    rest_worker: Option<String>,
}

/// Properties of one service under `response.data`.
#[derive(Debug, Default, Deserialize)]
struct ServiceData {
    #[serde(rename = "X-Status", default)]
    status: String,
    #[serde(rename = "X-Service-Type", default)]
    kind: String,
    /// JSON-encoded nested array of `{"ip": "addr/prefix", ...}` objects.
    #[serde(rename = "X-VIPS")]
    vips: Option<String>,
    /// JSON-encoded string list, or a plain list on some API versions.
    #[serde(rename = "X-Service-Objects")]
    objects: Option<Value>,
    /// Remaining properties, including the `X-Container-Network-*` keys.
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Classify an HTTP response into an error, if it is one.
fn check_response(status: StatusCode, body: &[u8], path: &str) -> Result<(), NdnfsError> {
    let err: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let detail = || {
        err.message
            .clone()
            .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_owned())
    };

    match err.code.as_deref() {
        Some(CODE_EXISTS) => return Err(NdnfsError::Conflict(path.to_owned())),
        Some(CODE_INVALID) => {
            return Err(NdnfsError::Backend(format!("{path}: EINVAL: {}", detail())));
        }
        _ => {}
    }
    if status == StatusCode::NOT_FOUND {
        return Err(NdnfsError::NotFound(path.to_owned()));
    }
    if status.as_u16() >= 400 {
        return Err(NdnfsError::Backend(format!("{path}: {status}: {}", detail())));
    }
    Ok(())
}

/// Decode `X-Service-Objects` entries of the form
/// `<id>,<tenant/bucket>@<cluster/tenant/bucket>`. Malformed entries are
/// skipped.
fn parse_service_objects(service: &str, raw: &Value) -> Result<Vec<NedgeNfsVolume>, NdnfsError> {
    let entries: Vec<String> = match raw {
        Value::String(s) => serde_json::from_str(s)
            .map_err(|e| NdnfsError::Backend(format!("X-Service-Objects of {service}: {e}")))?,
        Value::Array(_) => serde_json::from_value(raw.clone())
            .map_err(|e| NdnfsError::Backend(format!("X-Service-Objects of {service}: {e}")))?,
        Value::Null => Vec::new(),
        other => {
            return Err(NdnfsError::Backend(format!(
                "X-Service-Objects of {service}: unexpected {other}"
            )));
        }
    };

    let mut volumes = Vec::with_capacity(entries.len());
    for entry in &entries {
        let parsed = entry
            .split_once(',')
            .and_then(|(_, object)| object.split_once('@'))
            .filter(|(share, path)| !share.is_empty() && path.split('/').count() == 3);
        match parsed {
            Some((share, path)) => volumes.push(NedgeNfsVolume {
                volume_id: format!("{service}@{path}"),
                backend_path: path.to_owned(),
                share_path: format!("/{share}"),
            }),
            None => debug!(service, entry = %entry, "skipping malformed service object"),
        }
    }
    Ok(volumes)
}

/// First `ip` in the JSON-encoded `X-VIPS` value, without its prefix length.
fn parse_vip(raw: &str) -> Option<String> {
    let groups: Vec<Value> = serde_json::from_str(raw).ok()?;
    groups
        .iter()
        .filter_map(Value::as_array)
        .flatten()
        .find_map(|item| item.get("ip").and_then(Value::as_str))
        .map(|ip| ip.split('/').next().unwrap_or(ip).to_owned())
        .filter(|ip| !ip.is_empty())
}

fn network_addresses(data: &ServiceData) -> Vec<String> {
    if let Some(vips) = &data.vips {
        return parse_vip(vips).into_iter().collect();
    }
    data.extra
        .iter()
        .filter(|(key, _)| key.starts_with(NETWORK_KEY_PREFIX))
        .filter_map(|(_, value)| value.as_str()?.strip_prefix(CLIENT_NET_PREFIX))
        .map(|addr| addr.trim().to_owned())
        .collect()
}

fn into_service(name: &str, data: &ServiceData) -> Result<NedgeService, NdnfsError> {
    let exports = match &data.objects {
        Some(raw) => parse_service_objects(name, raw)?,
        None => Vec::new(),
    };
    Ok(NedgeService {
        name: name.to_owned(),
        kind: data.kind.clone(),
        status: data.status.clone(),
        network_addresses: network_addresses(data),
        exports,
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the NexentaEdge management API.
#[derive(Debug, Clone)]
pub struct NedgeClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl NedgeClient {
    pub fn new(config: &NedgeClientConfig) -> Result<Self, NdnfsError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(NdnfsError::backend)?;
        Ok(Self {
            http,
            base_url: config.base_url(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Send a request and return the raw body once the status and error
    /// code have been checked.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Vec<u8>, NdnfsError> {
        let path = path.trim_start_matches('/');
        let url = format!("{}{path}", self.base_url);
        debug!(%method, %url, "nedge request");

        let mut request = self
            .http
            .request(method, &url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(NdnfsError::backend)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(NdnfsError::backend)?;
        check_response(status, &bytes, path)?;
        Ok(bytes.to_vec())
    }

    /// GET `path` and decode `response` from the envelope, if present.
    async fn fetch_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, NdnfsError> {
        let body = self.send(Method::GET, path, None).await?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)
            .map_err(|e| NdnfsError::Backend(format!("{path}: malformed response: {e}")))?;
        Ok(envelope.response)
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, NdnfsError> {
        self.fetch_optional(path)
            .await?
            .ok_or_else(|| NdnfsError::Backend(format!("{path}: response object missing")))
    }

    async fn fetch_service_data(&self, name: &str) -> Result<ServiceData, NdnfsError> {
        let path = format!("service/{name}");
        let envelope: DataEnvelope<ServiceData> = self.fetch(&path).await?;
        envelope
            .data
            .ok_or_else(|| NdnfsError::Backend(format!("{path}: response.data missing")))
    }

    async fn list_buckets(&self, cluster: &str, tenant: &str) -> Result<Vec<String>, NdnfsError> {
        // An empty tenant answers without a response object.
        let buckets = self
            .fetch_optional(&format!("clusters/{cluster}/tenants/{tenant}/buckets"))
            .await?;
        Ok(buckets.unwrap_or_default())
    }
}

#[async_trait]
impl ClusterApi for NedgeClient {
    async fn list_clusters(&self) -> Result<Vec<String>, NdnfsError> {
        self.fetch("clusters").await
    }

    async fn list_tenants(&self, cluster: &str) -> Result<Vec<String>, NdnfsError> {
        self.fetch(&format!("clusters/{cluster}/tenants")).await
    }

    /// The listing carries status and type only. Enabled NFS services are
    /// completed with their details so their addresses are known.
    async fn list_services(&self) -> Result<Vec<NedgeService>, NdnfsError> {
        let envelope: DataEnvelope<BTreeMap<String, ServiceData>> = self.fetch("service").await?;
        let data = envelope
            .data
            .ok_or_else(|| NdnfsError::Backend("service: response.data missing".into()))?;

        let mut services = Vec::with_capacity(data.len());
        for (name, svc) in &data {
            let listed = NedgeService {
                name: name.clone(),
                kind: svc.kind.clone(),
                status: svc.status.clone(),
                network_addresses: network_addresses(svc),
                exports: Vec::new(),
            };
            let needs_details = listed.kind == SERVICE_KIND_NFS
                && listed.status == SERVICE_STATUS_ENABLED
                && listed.network_addresses.is_empty();
            if !needs_details {
                services.push(listed);
                continue;
            }
            match self.get_service(name).await {
                Ok(detailed) => services.push(detailed),
                Err(e) => {
                    warn!(service = %name, error = %e, "cannot fetch service details");
                    services.push(listed);
                }
            }
        }
        Ok(services)
    }

    async fn get_service(&self, name: &str) -> Result<NedgeService, NdnfsError> {
        let data = self.fetch_service_data(name).await?;
        into_service(name, &data)
    }

    async fn list_nfs_volumes(&self, service: &str) -> Result<Vec<NedgeNfsVolume>, NdnfsError> {
        let data = self.fetch_service_data(service).await?;
        match &data.objects {
            Some(raw) => parse_service_objects(service, raw),
            None => Ok(Vec::new()),
        }
    }

    async fn is_bucket_exist(
        &self,
        cluster: &str,
        tenant: &str,
        bucket: &str,
    ) -> Result<bool, NdnfsError> {
        match self.list_buckets(cluster, tenant).await {
            Ok(buckets) => Ok(buckets.iter().any(|b| b == bucket)),
            // A missing tenant has no buckets.
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, options))]
    async fn create_bucket(
        &self,
        cluster: &str,
        tenant: &str,
        bucket: &str,
        chunk_size: u64,
        options: &HashMap<String, String>,
    ) -> Result<(), NdnfsError> {
        let mut object = serde_json::Map::new();
        for (key, value) in options {
            object.insert(key.clone(), json!(value));
        }
        object.insert(CHUNK_SIZE_BUCKET_OPTION.to_owned(), json!(chunk_size));
        let body = json!({ "bucketName": bucket, "optionsObject": object });
        self.send(
            Method::POST,
            &format!("clusters/{cluster}/tenants/{tenant}/buckets"),
            Some(body),
        )
        .await?;
        info!("bucket created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_bucket(
        &self,
        cluster: &str,
        tenant: &str,
        bucket: &str,
        force: bool,
    ) -> Result<(), NdnfsError> {
        let mut path = format!("clusters/{cluster}/tenants/{tenant}/buckets/{bucket}");
        if force {
            path.push_str("?force=true");
        }
        self.send(Method::DELETE, &path, None).await?;
        info!("bucket deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_bucket_quota(
        &self,
        cluster: &str,
        tenant: &str,
        bucket: &str,
        quota: u64,
    ) -> Result<(), NdnfsError> {
        let body = json!({ "optionsObject": { "quota": quota } });
        self.send(
            Method::PUT,
            &format!("clusters/{cluster}/tenants/{tenant}/buckets/{bucket}"),
            Some(body),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn serve_bucket(
        &self,
        service: &str,
        cluster: &str,
        tenant: &str,
        bucket: &str,
    ) -> Result<(), NdnfsError> {
        let body = json!({ "serve": format!("{cluster}/{tenant}/{bucket}") });
        self.send(Method::PUT, &format!("service/{service}/serve"), Some(body))
            .await?;
        info!("bucket served");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unserve_bucket(
        &self,
        service: &str,
        cluster: &str,
        tenant: &str,
        bucket: &str,
    ) -> Result<(), NdnfsError> {
        let body = json!({ "serve": format!("{cluster}/{tenant}/{bucket}") });
        self.send(Method::DELETE, &format!("service/{service}/serve"), Some(body))
            .await?;
        info!("bucket unserved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_service_acl(
        &self,
        service: &str,
        tenant: &str,
        bucket: &str,
        acl: &str,
    ) -> Result<(), NdnfsError> {
        let body = json!({
            "param": format!("{ACL_PARAM_PREFIX}{tenant}/{bucket}"),
            "value": acl,
        });
        self.send(Method::PUT, &format!("service/{service}/config"), Some(body))
            .await?;
        Ok(())
    }

    async fn check_health(&self) -> Result<(), NdnfsError> {
        let status: SystemStatus = self.fetch("system/status").await?;
        match status.rest_worker.as_deref() {
            Some("ok") => Ok(()),
            other => {
                warn!(rest_worker = ?other, "management API unhealthy");
                Err(NdnfsError::Backend(format!(
                    "system/status: restWorker is {}",
                    other.unwrap_or("missing")
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve fixed JSON bodies on an ephemeral local port.
    async fn fixture_client(routes: Vec<(&'static str, Value)>) -> NedgeClient {
        let app = routes.into_iter().fold(Router::new(), |router, (path, body)| {
            router.route(
                path,
                get(move || {
                    let body = body.clone();
                    async move { Json(body) }
                }),
            )
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        NedgeClient::new(&NedgeClientConfig {
            address: "127.0.0.1".into(),
            port,
            username: "admin".into(),
            password: "nexenta".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn service_data(raw: Value) -> ServiceData {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn decodes_service_objects_string() {
        let raw = json!(r#"["1,ten1/vol1@clu1/ten1/vol1","2,ten1/vol2@clu1/ten1/vol2"]"#);
        let volumes = parse_service_objects("nfs01", &raw).unwrap();
        assert_eq!(
            volumes,
            vec![
                NedgeNfsVolume {
                    volume_id: "nfs01@clu1/ten1/vol1".into(),
                    backend_path: "clu1/ten1/vol1".into(),
                    share_path: "/ten1/vol1".into(),
                },
                NedgeNfsVolume {
                    volume_id: "nfs01@clu1/ten1/vol2".into(),
                    backend_path: "clu1/ten1/vol2".into(),
                    share_path: "/ten1/vol2".into(),
                },
            ]
        );
    }

    #[test]
    fn malformed_service_objects_are_skipped() {
        let raw = json!(["no-comma", "1,missing-at", "2,ten/b@clu/ten", "3,ten1/ok@clu1/ten1/ok"]);
        let volumes = parse_service_objects("nfs01", &raw).unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].volume_id, "nfs01@clu1/ten1/ok");
    }

    #[test]
    fn undecodable_service_objects_are_backend_errors() {
        let raw = json!("not json");
        assert!(matches!(
            parse_service_objects("nfs01", &raw),
            Err(NdnfsError::Backend(_))
        ));
    }

    #[test]
    fn vip_prefix_is_stripped() {
        let raw = r#"[[{"domain":"x","ip":"10.3.30.75/24"}],[{"ip":"10.3.30.76/24"}]]"#;
        assert_eq!(parse_vip(raw).as_deref(), Some("10.3.30.75"));
        assert_eq!(parse_vip(r#"[[{"ip":"10.0.0.9"}]]"#).as_deref(), Some("10.0.0.9"));
        assert_eq!(parse_vip("[]"), None);
        assert_eq!(parse_vip("garbage"), None);
    }

    #[test]
    fn vips_take_precedence_over_container_network() {
        let data = service_data(json!({
            "X-Status": "enabled",
            "X-Service-Type": "nfs",
            "X-VIPS": r#"[[{"ip":"10.3.30.75/24"}]]"#,
            "X-Container-Network-nfs01": "client-net --ip 10.0.0.5",
        }));
        assert_eq!(network_addresses(&data), ["10.3.30.75"]);
    }

    #[test]
    fn container_network_addresses_in_key_order() {
        let data = service_data(json!({
            "X-Status": "enabled",
            "X-Service-Type": "nfs",
            "X-Container-Network-b": "client-net --ip 10.0.0.6",
            "X-Container-Network-a": "client-net --ip 10.0.0.5",
            "X-Container-Network-c": "replicast",
            "X-Other": "client-net --ip 10.0.0.7",
        }));
        assert_eq!(network_addresses(&data), ["10.0.0.5", "10.0.0.6"]);
    }

    #[test]
    fn service_data_decodes_into_service() {
        let data = service_data(json!({
            "X-Status": "enabled",
            "X-Service-Type": "nfs",
            "X-Container-Network-a": "client-net --ip 10.0.0.5",
            "X-Service-Objects": r#"["1,ten1/vol1@clu1/ten1/vol1"]"#,
        }));
        let service = into_service("nfs01", &data).unwrap();
        assert!(service.is_eligible());
        assert_eq!(service.exports.len(), 1);
        assert_eq!(
            service.endpoint_for(&service.exports[0]).as_deref(),
            Some("10.0.0.5:/ten1/vol1")
        );
    }

    #[test]
    fn response_classification() {
        let path = "clusters/c/tenants/t/buckets";
        assert!(check_response(StatusCode::OK, br#"{"response":"ok"}"#, path).is_ok());
        assert!(check_response(StatusCode::OK, b"", path).is_ok());
        assert!(
            check_response(StatusCode::OK, br#"{"code":"RT_ERR_EXISTS"}"#, path)
                .unwrap_err()
                .is_conflict()
        );
        assert!(
            check_response(StatusCode::BAD_REQUEST, br#"{"code":"RT_ERR_EXISTS"}"#, path)
                .unwrap_err()
                .is_conflict()
        );
        assert!(matches!(
            check_response(StatusCode::OK, br#"{"code":"EINVAL","message":"bad"}"#, path),
            Err(NdnfsError::Backend(m)) if m.contains("bad")
        ));
        assert!(
            check_response(StatusCode::NOT_FOUND, b"", path)
                .unwrap_err()
                .is_not_found()
        );
        assert!(matches!(
            check_response(StatusCode::INTERNAL_SERVER_ERROR, b"boom", path),
            Err(NdnfsError::Backend(m)) if m.contains("boom")
        ));
    }

    #[tokio::test]
    async fn list_services_fetches_details_missing_from_listing() {
        let client = fixture_client(vec![
            (
                "/service",
                json!({"response": {"data": {
                    "nfs01": {"X-Status": "enabled", "X-Service-Type": "nfs"},
                    "nfs02": {"X-Status": "disabled", "X-Service-Type": "nfs"},
                    "s3a": {"X-Status": "enabled", "X-Service-Type": "s3"},
                }}}),
            ),
            (
                "/service/nfs01",
                json!({"response": {"data": {
                    "X-Status": "enabled",
                    "X-Service-Type": "nfs",
                    "X-Container-Network-nfs01": "client-net --ip 10.0.0.5",
                    "X-Service-Objects": r#"["1,ten1/vol1@clu1/ten1/vol1"]"#,
                }}}),
            ),
        ])
        .await;

        let services = client.list_services().await.unwrap();
        let names: Vec<_> = services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["nfs01", "nfs02", "s3a"]);
        assert!(services[0].is_eligible());
        assert_eq!(services[0].network_addresses, ["10.0.0.5"]);
        assert!(!services[1].is_eligible());
        assert!(!services[2].is_eligible());

        let snapshot = crate::topology::ClusterSnapshot::build(&client, None, &[])
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.find_service("nfs01").unwrap().exports.len(), 1);
    }

    #[tokio::test]
    async fn list_services_keeps_service_whose_details_fail() {
        let client = fixture_client(vec![(
            "/service",
            json!({"response": {"data": {
                "nfs01": {"X-Status": "enabled", "X-Service-Type": "nfs"},
            }}}),
        )])
        .await;

        let services = client.list_services().await.unwrap();
        assert_eq!(services.len(), 1);
        assert!(services[0].network_addresses.is_empty());
    }

    #[test]
    fn client_builds_base_url() {
        let config = NedgeClientConfig {
            address: "10.1.1.1".into(),
            port: NedgeClientConfig::DEFAULT_PORT,
            username: "admin".into(),
            password: "nexenta".into(),
            timeout: NedgeClientConfig::DEFAULT_TIMEOUT,
        };
        let client = NedgeClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://10.1.1.1:8080/");
    }
}
