//! Drive the HTTP hub client against a tiny in-process server.

use model_snapshot::{
    snapshot_download, FailedRequest, HttpHub, Hub, HubConfig, Pattern, RepoType,
    SnapshotRequest,
};
use sec::Secret;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

const INFO_PATH: &str = "/api/models/acme/tiny-ner/revision/main?blobs=true";

struct Route {
    path: &'static str,
    status: u16,
    body: Vec<u8>,
}

impl Route {
    fn ok<B: Into<Vec<u8>>>(path: &'static str, body: B) -> Route {
        Route {
            path,
            status: 200,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    headers: Vec<(String, String)>,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

struct Server {
    address: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Server {
    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a server which answers each request from a fixed routing table and
/// closes the connection afterwards.
fn serve(routes: Vec<Route>) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(_) => return,
            };
            let _ = handle(stream, &routes, &seen);
        }
    });

    Server { address, requests }
}

fn handle(
    mut stream: TcpStream,
    routes: &[Route],
    seen: &Mutex<Vec<Recorded>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some(colon) = line.find(':') {
            headers.push((
                line[..colon].trim().to_lowercase(),
                line[colon + 1..].trim().to_string(),
            ));
        }
    }

    let (status, body) = routes
        .iter()
        .find(|r| r.path == path)
        .map(|r| (r.status, r.body.clone()))
        .unwrap_or_else(|| (404, b"Entry not found".to_vec()));

    seen.lock().unwrap().push(Recorded { path, headers });

    write!(
        stream,
        "HTTP/1.1 {} Status\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    )?;
    stream.write_all(&body)?;
    stream.flush()
}

fn hub_for(server: &Server, token: Option<&str>) -> HttpHub {
    let cfg = HubConfig {
        endpoint: Some(server.address.clone()),
        token: token.map(|t| Secret::new(t.to_string())),
        ..Default::default()
    };

    HttpHub::with_config(&cfg).unwrap()
}

fn tiny_ner_routes() -> Vec<Route> {
    let info = r#"{
        "id": "acme/tiny-ner",
        "sha": "abc123",
        "siblings": [
            {"rfilename": "README.md", "size": 5},
            {"rfilename": "config.json", "size": 2},
            {"rfilename": "onnx/model.onnx", "size": 10},
            {"rfilename": "onnx/model_quantized.onnx", "size": 4}
        ]
    }"#;

    vec![
        Route::ok(INFO_PATH, info),
        Route::ok("/acme/tiny-ner/resolve/abc123/config.json", "{}"),
        Route::ok("/acme/tiny-ner/resolve/abc123/onnx/model_quantized.onnx", "ONNX"),
    ]
}

#[test]
fn download_a_filtered_snapshot() {
    let server = serve(tiny_ner_routes());
    let hub = hub_for(&server, Some("hf_test_token"));
    let temp = tempfile::tempdir().unwrap();
    let mut request = SnapshotRequest::new("acme/tiny-ner", temp.path());
    request.allow_patterns = Some(vec![
        Pattern::new("onnx/model_quantized.onnx"),
        Pattern::new("config.json"),
    ]);

    let snapshot = snapshot_download(&hub, &request).unwrap();

    assert_eq!(snapshot.sha, Some(String::from("abc123")));
    assert_eq!(snapshot.downloaded.len(), 2);
    assert_eq!(
        fs::read_to_string(temp.path().join("onnx").join("model_quantized.onnx")).unwrap(),
        "ONNX"
    );
    assert_eq!(
        fs::read_to_string(temp.path().join("config.json")).unwrap(),
        "{}"
    );
    assert!(!temp.path().join("README.md").exists());

    let requests = server.requests();
    let paths: Vec<_> = requests.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            INFO_PATH,
            "/acme/tiny-ner/resolve/abc123/config.json",
            "/acme/tiny-ner/resolve/abc123/onnx/model_quantized.onnx",
        ]
    );

    for request in &requests {
        assert_eq!(request.header("authorization"), Some("Bearer hf_test_token"));
        assert!(request
            .header("user-agent")
            .unwrap()
            .starts_with("model-snapshot/"));
    }
}

#[test]
fn second_run_only_fetches_the_listing() {
    let server = serve(tiny_ner_routes());
    let hub = hub_for(&server, None);
    let temp = tempfile::tempdir().unwrap();
    let mut request = SnapshotRequest::new("acme/tiny-ner", temp.path());
    request.allow_patterns = Some(vec![Pattern::new("config.json")]);

    snapshot_download(&hub, &request).unwrap();
    let second = snapshot_download(&hub, &request).unwrap();

    assert!(second.downloaded.is_empty());
    assert_eq!(second.skipped, vec![temp.path().join("config.json")]);
    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.header("authorization").is_none()));
}

#[test]
fn missing_repositories_are_failed_requests() {
    let server = serve(Vec::new());
    let hub = hub_for(&server, None);

    let err = hub
        .repo_info("acme/does-not-exist", RepoType::Model, "main")
        .unwrap_err();

    let failed = err
        .iter_chain()
        .filter_map(|cause| cause.downcast_ref::<FailedRequest>())
        .next()
        .unwrap();
    assert_eq!(failed.status.as_u16(), 404);
    assert!(failed.is_not_found());
    assert!(failed.url.ends_with("/api/models/acme/does-not-exist/revision/main?blobs=true"));
    let msg = err.to_string();
    assert!(msg.contains("acme/does-not-exist"));
    assert!(msg.contains("try passing a token"));
}

#[test]
fn missing_files_leave_nothing_behind() {
    let server = serve(vec![Route::ok(
        INFO_PATH,
        r#"{"sha": "abc123", "siblings": [{"rfilename": "vocab.txt", "size": 3}]}"#,
    )]);
    let hub = hub_for(&server, None);
    let temp = tempfile::tempdir().unwrap();
    let request = SnapshotRequest::new("acme/tiny-ner", temp.path());

    let err = snapshot_download(&hub, &request).unwrap_err();

    let failure = err
        .downcast_ref::<model_snapshot::DownloadFailure>()
        .unwrap();
    assert_eq!(failure.failed_files().collect::<Vec<_>>(), vec!["vocab.txt"]);
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);

    let mut buffer = Vec::new();
    failure.display(&mut buffer).unwrap();
    let report = String::from_utf8(buffer).unwrap();
    assert!(report.contains("404"));
    assert!(!report.contains("token"));
}
