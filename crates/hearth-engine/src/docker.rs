//! DockerEngine: Docker Engine HTTP API over the local unix socket.
//!
//! Each call opens a fresh HTTP/1.1 connection to the socket, the way the
//! engine CLI does. Connections are driven on a background task with
//! upgrades enabled so `attach` can take over the raw stream.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::UnixStream;
use tracing::{debug, trace};

use crate::error::{EngineError, EngineResult, classify};
use crate::logs::LogDecoder;
use crate::runtime::ContainerRuntime;
use crate::types::*;

/// Default engine socket on Linux hosts.
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Engine API version the request paths are pinned to.
pub const DEFAULT_API_VERSION: &str = "v1.43";

/// Docker Engine client.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    socket: PathBuf,
    api_version: String,
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET)
    }
}

impl DockerEngine {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    fn path(&self, path: &str) -> String {
        format!("/{}{}", self.api_version, path)
    }

    /// Send one request and return the raw response.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        upgrade: bool,
    ) -> EngineResult<Response<Incoming>> {
        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            EngineError::Transport(format!("connect {}: {e}", self.socket.display()))
        })?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| EngineError::Transport(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                trace!(error = %e, "engine connection closed with error");
            }
        });

        let uri = self.path(path);
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header("host", "docker")
            .header("user-agent", "hearth-engine/0.1");
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        if upgrade {
            builder = builder
                .header("connection", "Upgrade")
                .header("upgrade", "tcp");
        }
        let req = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| EngineError::Transport(format!("build request: {e}")))?;

        trace!(%method, %uri, "engine request");
        sender
            .send_request(req)
            .await
            .map_err(|e| EngineError::Transport(format!("{method} {uri}: {e}")))
    }

    /// Send a request and fail on any non-success status.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> EngineResult<Response<Incoming>> {
        let resp = self.send(method, path, body, false).await?;
        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(resp);
        }
        let bytes = read_body(resp).await.unwrap_or_default();
        Err(classify(status, &error_message(&bytes)))
    }

    /// Send a request and decode a JSON response body.
    async fn call_json<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> EngineResult<T> {
        let resp = self.call(method, path, body).await?;
        let bytes = read_body(resp).await?;
        serde_json::from_slice(&bytes).map_err(|e| EngineError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ContainerRuntime for DockerEngine {
    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerInspect> {
        let raw: WireInspect = self
            .call_json(Method::GET, &format!("/containers/{}/json", encode(id)), None)
            .await?;
        Ok(raw.into())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String> {
        let body = serde_json::to_vec(&WireCreate::from(spec))
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        let created: WireCreated = self
            .call_json(
                Method::POST,
                &format!("/containers/create?name={}", encode(&spec.name)),
                Some(body),
            )
            .await?;
        for warning in created.warnings.unwrap_or_default() {
            debug!(container = %spec.name, %warning, "engine warning on create");
        }
        debug!(container = %spec.name, id = %created.id, "container created");
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> EngineResult<()> {
        self.call(Method::POST, &format!("/containers/{}/start", encode(id)), None)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> EngineResult<()> {
        let path = format!("/containers/{}/stop?t={}", encode(id), timeout.as_secs());
        self.call(Method::POST, &path, None).await?;
        Ok(())
    }

    async fn restart_container(&self, id: &str, timeout: Duration) -> EngineResult<()> {
        let path = format!("/containers/{}/restart?t={}", encode(id), timeout.as_secs());
        self.call(Method::POST, &path, None).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> EngineResult<()> {
        let path = format!("/containers/{}?force={force}&v=false", encode(id));
        self.call(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn list_containers(
        &self,
        labels: &HashMap<String, String>,
        all: bool,
    ) -> EngineResult<Vec<ContainerSummary>> {
        let path = format!(
            "/containers/json?all={all}&filters={}",
            encode(&label_filters(labels))
        );
        let raw: Vec<WireContainerSummary> = self.call_json(Method::GET, &path, None).await?;
        Ok(raw.into_iter().map(Into::into).collect())
    }

    async fn container_logs(&self, id: &str, options: &LogOptions) -> EngineResult<LogStream> {
        let path = format!("/containers/{}/logs?{}", encode(id), log_query(options));
        let resp = self.call(Method::GET, &path, None).await?;
        Ok(log_stream(resp.into_body()))
    }

    async fn attach_stdin(&self, id: &str) -> EngineResult<StdinWriter> {
        let path = format!(
            "/containers/{}/attach?stream=1&stdin=1&stdout=0&stderr=0",
            encode(id)
        );
        let resp = self.send(Method::POST, &path, None, true).await?;
        let status = resp.status();
        if status != StatusCode::SWITCHING_PROTOCOLS && !status.is_success() {
            let bytes = read_body(resp).await.unwrap_or_default();
            return Err(classify(status, &error_message(&bytes)));
        }
        let upgraded = hyper::upgrade::on(resp)
            .await
            .map_err(|e| EngineError::Transport(format!("attach upgrade: {e}")))?;
        debug!(container = %id, "stdin attached");
        Ok(Box::pin(TokioIo::new(upgraded)))
    }

    async fn list_networks(&self, name: &str) -> EngineResult<Vec<NetworkSummary>> {
        let filters = serde_json::json!({ "name": [name] }).to_string();
        let path = format!("/networks?filters={}", encode(&filters));
        let raw: Vec<WireNetwork> = self.call_json(Method::GET, &path, None).await?;
        // The name filter is a substring match; keep exact matches only.
        Ok(raw
            .into_iter()
            .filter(|n| n.name == name)
            .map(Into::into)
            .collect())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> EngineResult<String> {
        let body = serde_json::to_vec(&WireNetworkCreate {
            name: &spec.name,
            driver: &spec.driver,
            labels: &spec.labels,
            check_duplicate: true,
        })
        .map_err(|e| EngineError::Decode(e.to_string()))?;
        let created: WireCreated = self
            .call_json(Method::POST, "/networks/create", Some(body))
            .await?;
        Ok(created.id)
    }

    async fn list_images(&self, reference: &str) -> EngineResult<Vec<ImageSummary>> {
        let filters = serde_json::json!({ "reference": [reference] }).to_string();
        let path = format!("/images/json?filters={}", encode(&filters));
        let raw: Vec<WireImage> = self.call_json(Method::GET, &path, None).await?;
        Ok(raw.into_iter().map(Into::into).collect())
    }

    async fn pull_image(&self, reference: &str) -> EngineResult<()> {
        let (image, tag) = split_reference(reference);
        let path = format!(
            "/images/create?fromImage={}&tag={}",
            encode(image),
            encode(tag)
        );
        let resp = self.call(Method::POST, &path, None).await?;
        let mut body = resp.into_body();
        let mut pending = Vec::new();
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|e| EngineError::Transport(format!("pull stream: {e}")))?;
            let Ok(data) = frame.into_data() else {
                continue;
            };
            pending.extend_from_slice(&data);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                report_pull_progress(reference, &line)?;
            }
        }
        if !pending.is_empty() {
            report_pull_progress(reference, &pending)?;
        }
        debug!(image = %reference, "image pulled");
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────

fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

async fn read_body(resp: Response<Incoming>) -> EngineResult<Bytes> {
    resp.into_body()
        .collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| EngineError::Transport(format!("read body: {e}")))
}

/// Pull the `message` out of an engine error body, falling back to raw text.
fn error_message(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(e) => e.message,
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    }
}

fn label_filters(labels: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    serde_json::json!({ "label": pairs }).to_string()
}

fn log_query(options: &LogOptions) -> String {
    let mut query = vec![
        "stdout=1".to_string(),
        "stderr=1".to_string(),
        format!("follow={}", options.follow as u8),
        format!("timestamps={}", options.timestamps as u8),
    ];
    match options.tail {
        Some(n) => query.push(format!("tail={n}")),
        None => query.push("tail=all".to_string()),
    }
    if let Some(since) = options.since {
        query.push(format!("since={since}"));
    }
    if let Some(until) = options.until {
        query.push(format!("until={until}"));
    }
    query.join("&")
}

/// Split `repo[:tag]` into its parts, defaulting the tag to `latest`.
///
/// A colon inside a registry host (`host:5000/repo`) is not a tag separator.
fn split_reference(reference: &str) -> (&str, &str) {
    let reference = reference.split('@').next().unwrap_or(reference);
    match reference.rfind(':') {
        Some(pos) if !reference[pos + 1..].contains('/') => {
            (&reference[..pos], &reference[pos + 1..])
        }
        _ => (reference, "latest"),
    }
}

fn report_pull_progress(reference: &str, line: &[u8]) -> EngineResult<()> {
    #[derive(Deserialize)]
    struct Progress {
        status: Option<String>,
        id: Option<String>,
        progress: Option<String>,
        error: Option<String>,
    }
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Ok(());
    }
    let Ok(progress) = serde_json::from_slice::<Progress>(trimmed) else {
        return Ok(());
    };
    if let Some(error) = progress.error {
        return Err(EngineError::Api {
            status: 500,
            message: format!("pull {reference}: {error}"),
        });
    }
    debug!(
        image = %reference,
        layer = progress.id.as_deref().unwrap_or(""),
        status = progress.status.as_deref().unwrap_or(""),
        progress = progress.progress.as_deref().unwrap_or(""),
        "pull progress"
    );
    Ok(())
}

fn log_stream(body: Incoming) -> LogStream {
    let state = (body, LogDecoder::new(), false);
    Box::pin(stream::unfold(
        state,
        |(mut body, mut decoder, mut done)| async move {
            loop {
                if let Some(line) = decoder.next_line() {
                    return Some((Ok(line), (body, decoder, done)));
                }
                if done {
                    return None;
                }
                match body.frame().await {
                    Some(Ok(frame)) => {
                        if let Ok(data) = frame.into_data() {
                            decoder.push(&data);
                        }
                    }
                    Some(Err(e)) => {
                        let err = EngineError::Transport(format!("log stream: {e}"));
                        return Some((Err(err), (body, decoder, true)));
                    }
                    None => {
                        decoder.finish();
                        done = true;
                    }
                }
            }
        },
    ))
}

// ── Wire types ────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireInspect {
    id: String,
    name: String,
    state: WireState,
    config: WireConfig,
    host_config: WireHostConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireState {
    status: String,
    running: bool,
    exit_code: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireConfig {
    image: String,
    labels: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireHostConfig {
    binds: Option<Vec<String>>,
}

impl From<WireInspect> for ContainerInspect {
    fn from(w: WireInspect) -> Self {
        Self {
            id: w.id,
            name: w.name.trim_start_matches('/').to_string(),
            image: w.config.image,
            running: w.state.running,
            status: w.state.status,
            exit_code: w.state.exit_code,
            labels: w.config.labels.unwrap_or_default(),
            binds: w
                .host_config
                .binds
                .unwrap_or_default()
                .iter()
                .filter_map(|b| BindMount::parse(b))
                .collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireCreate {
    image: String,
    env: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cmd: Option<Vec<String>>,
    labels: HashMap<String, String>,
    exposed_ports: HashMap<String, serde_json::Value>,
    open_stdin: bool,
    stdin_once: bool,
    attach_stdin: bool,
    tty: bool,
    host_config: WireCreateHostConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireCreateHostConfig {
    binds: Vec<String>,
    port_bindings: HashMap<String, Vec<WirePortBinding>>,
    memory: u64,
    cpu_shares: u64,
    restart_policy: WireRestartPolicy,
    network_mode: String,
    privileged: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WirePortBinding {
    host_ip: String,
    host_port: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireRestartPolicy {
    name: String,
}

impl From<&ContainerSpec> for WireCreate {
    fn from(spec: &ContainerSpec) -> Self {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings: HashMap<String, Vec<WirePortBinding>> = HashMap::new();
        for p in &spec.ports {
            let key = format!("{}/{}", p.container_port, p.protocol.as_str());
            exposed_ports.insert(key.clone(), serde_json::json!({}));
            port_bindings.entry(key).or_default().push(WirePortBinding {
                host_ip: "0.0.0.0".to_string(),
                host_port: p.host_port.to_string(),
            });
        }
        Self {
            image: spec.image.clone(),
            env: spec.env.clone(),
            cmd: spec.cmd.clone(),
            labels: spec.labels.clone(),
            exposed_ports,
            open_stdin: spec.open_stdin,
            stdin_once: false,
            attach_stdin: false,
            tty: false,
            host_config: WireCreateHostConfig {
                binds: spec.binds.iter().map(BindMount::to_engine_string).collect(),
                port_bindings,
                memory: spec.memory_bytes,
                cpu_shares: spec.cpu_shares,
                restart_policy: WireRestartPolicy {
                    name: spec.restart_policy.as_str().to_string(),
                },
                network_mode: spec.network.clone(),
                privileged: spec.privileged,
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireCreated {
    id: String,
    warnings: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireContainerSummary {
    id: String,
    names: Option<Vec<String>>,
    image: String,
    state: String,
    labels: Option<HashMap<String, String>>,
}

impl From<WireContainerSummary> for ContainerSummary {
    fn from(w: WireContainerSummary) -> Self {
        Self {
            id: w.id,
            names: w
                .names
                .unwrap_or_default()
                .into_iter()
                .map(|n| n.trim_start_matches('/').to_string())
                .collect(),
            image: w.image,
            state: w.state,
            labels: w.labels.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireNetwork {
    id: String,
    name: String,
    labels: Option<HashMap<String, String>>,
}

impl From<WireNetwork> for NetworkSummary {
    fn from(w: WireNetwork) -> Self {
        Self {
            id: w.id,
            name: w.name,
            labels: w.labels.unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireNetworkCreate<'a> {
    name: &'a str,
    driver: &'a str,
    labels: &'a HashMap<String, String>,
    check_duplicate: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireImage {
    id: String,
    repo_tags: Option<Vec<String>>,
}

impl From<WireImage> for ImageSummary {
    fn from(w: WireImage) -> Self {
        Self {
            id: w.id,
            repo_tags: w.repo_tags.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> ContainerSpec {
        ContainerSpec {
            name: "gameserver-gs-1".to_string(),
            image: "itzg/minecraft-server".to_string(),
            env: vec!["EULA=TRUE".to_string()],
            cmd: None,
            labels: HashMap::from([("hearth.managed".to_string(), "true".to_string())]),
            ports: vec![
                PortBinding {
                    host_port: 25565,
                    container_port: 25565,
                    protocol: Protocol::Tcp,
                },
                PortBinding {
                    host_port: 25565,
                    container_port: 25565,
                    protocol: Protocol::Udp,
                },
            ],
            binds: vec![BindMount {
                host_path: "/srv/hearth/gameservers/gs-1".to_string(),
                container_path: "/data".to_string(),
            }],
            memory_bytes: 2 << 30,
            cpu_shares: 2048,
            restart_policy: RestartPolicy::UnlessStopped,
            network: "hearth-gameservers".to_string(),
            privileged: false,
            open_stdin: true,
        }
    }

    #[test]
    fn create_body_matches_engine_schema() {
        let body = serde_json::to_value(WireCreate::from(&sample_spec())).unwrap();

        assert_eq!(body["Image"], "itzg/minecraft-server");
        assert_eq!(body["OpenStdin"], true);
        assert_eq!(body["Tty"], false);
        assert!(body.get("Cmd").is_none());
        assert!(body["ExposedPorts"].get("25565/tcp").is_some());
        assert!(body["ExposedPorts"].get("25565/udp").is_some());

        let host = &body["HostConfig"];
        assert_eq!(host["Binds"][0], "/srv/hearth/gameservers/gs-1:/data");
        assert_eq!(host["PortBindings"]["25565/tcp"][0]["HostPort"], "25565");
        assert_eq!(host["Memory"], 2u64 << 30);
        assert_eq!(host["CpuShares"], 2048);
        assert_eq!(host["RestartPolicy"]["Name"], "unless-stopped");
        assert_eq!(host["NetworkMode"], "hearth-gameservers");
        assert_eq!(host["Privileged"], false);
    }

    #[test]
    fn inspect_decodes_engine_json() {
        let json = r#"{
            "Id": "abc123",
            "Name": "/gameserver-gs-1",
            "State": {"Status": "exited", "Running": false, "ExitCode": 1},
            "Config": {"Image": "itzg/minecraft-server", "Labels": {"hearth.managed": "true"}},
            "HostConfig": {"Binds": ["/srv/gs-1:/data:rw"]}
        }"#;
        let raw: WireInspect = serde_json::from_str(json).unwrap();
        let inspect = ContainerInspect::from(raw);

        assert_eq!(inspect.name, "gameserver-gs-1");
        assert!(!inspect.running);
        assert_eq!(inspect.exit_code, 1);
        assert!(inspect.has_label("hearth.managed", "true"));
        assert_eq!(inspect.binds[0].host_path, "/srv/gs-1");
    }

    #[test]
    fn inspect_tolerates_null_labels_and_binds() {
        let json = r#"{
            "Id": "abc123",
            "Name": "/x",
            "State": {"Status": "running", "Running": true, "ExitCode": 0},
            "Config": {"Image": "busybox", "Labels": null},
            "HostConfig": {"Binds": null}
        }"#;
        let inspect = ContainerInspect::from(serde_json::from_str::<WireInspect>(json).unwrap());
        assert!(inspect.labels.is_empty());
        assert!(inspect.binds.is_empty());
    }

    #[test]
    fn error_message_prefers_json_field() {
        assert_eq!(
            error_message(br#"{"message":"No such container: x"}"#),
            "No such container: x"
        );
        assert_eq!(error_message(b"  plain failure \n"), "plain failure");
    }

    #[test]
    fn references_split_into_image_and_tag() {
        assert_eq!(split_reference("itzg/minecraft-server"), ("itzg/minecraft-server", "latest"));
        assert_eq!(split_reference("itzg/minecraft-server:java21"), ("itzg/minecraft-server", "java21"));
        assert_eq!(split_reference("registry:5000/team/img"), ("registry:5000/team/img", "latest"));
        assert_eq!(split_reference("registry:5000/team/img:v2"), ("registry:5000/team/img", "v2"));
    }

    #[test]
    fn log_query_passes_options_through() {
        let q = log_query(&LogOptions {
            tail: Some(50),
            follow: true,
            since: Some(100),
            until: None,
            timestamps: false,
        });
        assert!(q.contains("tail=50"));
        assert!(q.contains("follow=1"));
        assert!(q.contains("since=100"));
        assert!(!q.contains("until="));

        let q = log_query(&LogOptions::default());
        assert!(q.contains("tail=all"));
        assert!(q.contains("follow=0"));
    }

    #[test]
    fn label_filter_is_sorted_json() {
        let labels = HashMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(label_filters(&labels), r#"{"label":["a=1","b=2"]}"#);
    }

    #[test]
    fn pull_error_line_fails_the_pull() {
        assert!(report_pull_progress("img", br#"{"status":"Downloading","id":"abc"}"#).is_ok());
        assert!(report_pull_progress("img", b"not json").is_ok());
        let err = report_pull_progress("img", br#"{"error":"manifest unknown"}"#).unwrap_err();
        assert!(err.to_string().contains("manifest unknown"));
    }

    #[tokio::test]
    async fn missing_socket_is_transport_error() {
        let engine = DockerEngine::new("/nonexistent/hearth-test.sock");
        let err = engine.inspect_container("abc").await.unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
    }
}
