//! Minimal HTTP/1.1 hawkBit server for integration tests.
//!
//! Serves the controller base resource, a single deployment, cancel
//! actions and a range-capable artifact download. Records every feedback
//! and configData document it receives. Download failures can be scripted
//! by truncating the body mid-transfer (the connection is closed early so
//! the client sees a partial transfer).

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const TENANT: &str = "DEFAULT";
pub const CONTROLLER: &str = "test-target";

/// A recorded status document.
#[derive(Debug, Clone)]
pub struct Feedback {
    pub path: String,
    pub body: serde_json::Value,
}

impl Feedback {
    pub fn execution(&self) -> &str {
        self.body["status"]["execution"].as_str().unwrap_or("")
    }

    pub fn finished(&self) -> &str {
        self.body["status"]["result"]["finished"].as_str().unwrap_or("")
    }

    pub fn detail(&self) -> &str {
        self.body["status"]["details"][0].as_str().unwrap_or("")
    }
}

/// How the artifact download endpoint behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPlan {
    /// Serve the requested range completely.
    Full,
    /// Truncate the first transfer after this many bytes, then serve fully.
    FailOnceAfter(usize),
    /// Truncate every transfer after this many bytes.
    AlwaysFailAfter(usize),
}

#[derive(Debug)]
pub struct ServerState {
    pub base_status: Mutex<u32>,
    pub offer_config_data: Mutex<bool>,
    pub deployment: Mutex<Option<serde_json::Value>>,
    pub cancel_stop_id: Mutex<Option<String>>,
    pub bundle: Mutex<Vec<u8>>,
    pub download_plan: Mutex<DownloadPlan>,
    /// `Range` offsets observed by the download endpoint, `None` for full requests.
    pub download_ranges: Mutex<Vec<Option<u64>>>,
    /// Number of feedback posts to answer with 429 before accepting.
    pub feedback_reject: Mutex<u32>,
    pub rejected_feedback: Mutex<u32>,
    pub feedback: Mutex<Vec<Feedback>>,
    pub config_data: Mutex<Vec<serde_json::Value>>,
}

pub struct MockHawkbit {
    pub state: Arc<ServerState>,
    port: u16,
}

impl MockHawkbit {
    /// Starts the server on an ephemeral port. Runs until the process exits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(ServerState {
            base_status: Mutex::new(200),
            offer_config_data: Mutex::new(false),
            deployment: Mutex::new(None),
            cancel_stop_id: Mutex::new(None),
            bundle: Mutex::new(Vec::new()),
            download_plan: Mutex::new(DownloadPlan::Full),
            download_ranges: Mutex::new(Vec::new()),
            feedback_reject: Mutex::new(0),
            rejected_feedback: Mutex::new(0),
            feedback: Mutex::new(Vec::new()),
            config_data: Mutex::new(Vec::new()),
        });

        {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for stream in listener.incoming().flatten() {
                    let state = Arc::clone(&state);
                    thread::spawn(move || handle(stream, port, &state));
                }
            });
        }

        MockHawkbit { state, port }
    }

    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    pub fn bundle_url(&self) -> String {
        self.url("/bundle")
    }

    pub fn set_bundle(&self, data: Vec<u8>) {
        *self.state.bundle.lock().unwrap() = data;
    }

    pub fn set_download_plan(&self, plan: DownloadPlan) {
        *self.state.download_plan.lock().unwrap() = plan;
    }

    pub fn set_deployment(&self, doc: serde_json::Value) {
        *self.state.deployment.lock().unwrap() = Some(doc);
    }

    pub fn set_cancel(&self, stop_id: &str) {
        *self.state.cancel_stop_id.lock().unwrap() = Some(stop_id.to_owned());
    }

    pub fn set_offer_config_data(&self, offer: bool) {
        *self.state.offer_config_data.lock().unwrap() = offer;
    }

    pub fn set_base_status(&self, status: u32) {
        *self.state.base_status.lock().unwrap() = status;
    }

    pub fn set_feedback_reject(&self, count: u32) {
        *self.state.feedback_reject.lock().unwrap() = count;
    }

    pub fn rejected_feedback_count(&self) -> u32 {
        *self.state.rejected_feedback.lock().unwrap()
    }

    pub fn feedbacks(&self) -> Vec<Feedback> {
        self.state.feedback.lock().unwrap().clone()
    }

    pub fn config_data_documents(&self) -> Vec<serde_json::Value> {
        self.state.config_data.lock().unwrap().clone()
    }

    pub fn download_ranges(&self) -> Vec<Option<u64>> {
        self.state.download_ranges.lock().unwrap().clone()
    }

    /// A single-chunk deployment document downloading from this server.
    pub fn deployment_doc(
        &self,
        id: &str,
        download: &str,
        update: &str,
        maintenance_window: Option<&str>,
        size: u64,
        sha1: &str,
    ) -> serde_json::Value {
        let mut deployment = serde_json::json!({
            "download": download,
            "update": update,
            "chunks": [{
                "name": "rootfs",
                "version": "1.0",
                "artifacts": [{
                    "size": size,
                    "hashes": { "sha1": sha1 },
                    "_links": { "download": { "href": self.bundle_url() } }
                }]
            }]
        });
        if let Some(window) = maintenance_window {
            deployment["maintenanceWindow"] = serde_json::json!(window);
        }
        serde_json::json!({ "id": id, "deployment": deployment })
    }

    /// Blocks until at least `count` feedback documents were recorded.
    pub fn wait_for_feedback(&self, count: usize, timeout: Duration) -> Vec<Feedback> {
        let deadline = Instant::now() + timeout;
        loop {
            let feedback = self.feedbacks();
            if feedback.len() >= count {
                return feedback;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {count} feedback documents, got {}",
                feedback.len()
            );
            thread::sleep(Duration::from_millis(20));
        }
    }
}

fn base_path() -> String {
    format!("/{TENANT}/controller/v1/{CONTROLLER}")
}

fn handle(mut stream: TcpStream, port: u16, state: &ServerState) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));

    let Some((method, path, headers, body)) = read_request(&mut stream) else {
        return;
    };

    let base = base_path();
    let external = format!("http://127.0.0.1:{port}");

    if method == "GET" && path == base {
        let status = *state.base_status.lock().unwrap();
        if status != 200 {
            respond(&mut stream, status, "application/json", b"");
            return;
        }
        let mut links = serde_json::Map::new();
        if *state.offer_config_data.lock().unwrap() {
            links.insert(
                "configData".into(),
                serde_json::json!({ "href": format!("{external}{base}/configData") }),
            );
        }
        if let Some(dep) = state.deployment.lock().unwrap().as_ref() {
            let id = dep["id"].as_str().unwrap_or("0");
            links.insert(
                "deploymentBase".into(),
                serde_json::json!({ "href": format!("{external}{base}/deploymentBase/{id}") }),
            );
        }
        if let Some(stop_id) = state.cancel_stop_id.lock().unwrap().as_ref() {
            links.insert(
                "cancelAction".into(),
                serde_json::json!({ "href": format!("{external}{base}/cancelAction/{stop_id}") }),
            );
        }
        let doc = serde_json::json!({
            "config": { "polling": { "sleep": "00:00:05" } },
            "_links": links
        });
        respond(&mut stream, 200, "application/json", doc.to_string().as_bytes());
        return;
    }

    if method == "PUT" && path == format!("{base}/configData") {
        if let Ok(doc) = serde_json::from_slice(&body) {
            state.config_data.lock().unwrap().push(doc);
        }
        respond(&mut stream, 200, "application/json", b"");
        return;
    }

    if method == "POST" && path.ends_with("/feedback") {
        {
            let mut reject = state.feedback_reject.lock().unwrap();
            if *reject > 0 {
                *reject -= 1;
                *state.rejected_feedback.lock().unwrap() += 1;
                respond(&mut stream, 429, "application/json", b"");
                return;
            }
        }
        if let Ok(doc) = serde_json::from_slice(&body) {
            state.feedback.lock().unwrap().push(Feedback {
                path: path.clone(),
                body: doc,
            });
        }
        respond(&mut stream, 200, "application/json", b"");
        return;
    }

    if method == "GET" && path.starts_with(&format!("{base}/deploymentBase/")) {
        match state.deployment.lock().unwrap().as_ref() {
            Some(dep) => respond(&mut stream, 200, "application/json", dep.to_string().as_bytes()),
            None => respond(&mut stream, 404, "application/json", b""),
        }
        return;
    }

    if method == "GET" && path.starts_with(&format!("{base}/cancelAction/")) {
        let stop_id = path.rsplit('/').next().unwrap_or("");
        let doc = serde_json::json!({ "cancelAction": { "stopId": stop_id } });
        respond(&mut stream, 200, "application/json", doc.to_string().as_bytes());
        return;
    }

    if method == "GET" && path == "/bundle" {
        serve_bundle(&mut stream, state, &headers);
        return;
    }

    respond(&mut stream, 404, "text/plain", b"not found");
}

fn serve_bundle(stream: &mut TcpStream, state: &ServerState, headers: &[String]) {
    let bundle = state.bundle.lock().unwrap().clone();
    let total = bundle.len() as u64;

    let offset = headers.iter().find_map(|h| {
        let lower = h.to_ascii_lowercase();
        let value = lower.strip_prefix("range: bytes=")?;
        value.trim_end_matches('-').parse::<u64>().ok()
    });
    state.download_ranges.lock().unwrap().push(offset);

    let start = offset.unwrap_or(0);
    if start >= total && total > 0 {
        let header = format!(
            "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{total}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
        let _ = stream.write_all(header.as_bytes());
        return;
    }

    let slice = &bundle[start as usize..];
    let truncate_at = {
        let mut plan = state.download_plan.lock().unwrap();
        match *plan {
            DownloadPlan::Full => None,
            DownloadPlan::FailOnceAfter(n) => {
                *plan = DownloadPlan::Full;
                Some(n)
            }
            DownloadPlan::AlwaysFailAfter(n) => Some(n),
        }
    };

    let (status, content_range) = if offset.is_some() {
        (
            "206 Partial Content",
            format!("Content-Range: bytes {start}-{}/{total}\r\n", total - 1),
        )
    } else {
        ("200 OK", String::new())
    };

    // Content-Length always announces the full remainder; a scripted failure
    // truncates the body so the client observes a partial transfer.
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n{content_range}Connection: close\r\n\r\n",
        slice.len()
    );
    if stream.write_all(header.as_bytes()).is_err() {
        return;
    }

    let serve = match truncate_at {
        Some(n) => &slice[..n.min(slice.len())],
        None => slice,
    };
    let _ = stream.write_all(serve);
    let _ = stream.flush();
    // dropping the stream closes the connection; a truncated body shows up
    // as a partial transfer on the client
}

fn read_request(stream: &mut TcpStream) -> Option<(String, String, Vec<String>, Vec<u8>)> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_header_end(&data) {
            break pos;
        }
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
    };

    let header_text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_owned();
    let path = parts.next()?.to_owned();
    let headers: Vec<String> = lines.map(str::to_owned).collect();

    let content_length = headers
        .iter()
        .find_map(|h| {
            h.to_ascii_lowercase()
                .strip_prefix("content-length:")
                .map(|v| v.trim().parse::<usize>().ok())
        })
        .flatten()
        .unwrap_or(0);

    let mut body: Vec<u8> = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    Some((method, path, headers, body))
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn respond(stream: &mut TcpStream, status: u32, content_type: &str, body: &[u8]) {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        401 => "Unauthorized",
        429 => "Too Many Requests",
        _ => "Error",
    };
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}
