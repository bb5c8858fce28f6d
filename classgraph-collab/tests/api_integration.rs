//! Backend client against a raw-TCP HTTP stub.

use std::sync::{Arc, Mutex};

use classgraph_collab::{ApiError, ArtifactTarget, BackendClient, DiagramId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    target: String,
    authorization: Option<String>,
    body: String,
}

type Log = Arc<Mutex<Vec<Recorded>>>;

fn respond(method: &str, target: &str) -> (u16, &'static str, Vec<u8>) {
    let path = target.split('?').next().unwrap_or(target);
    match (method, path) {
        ("GET", "/diagrams") => (200, "application/json", br#"[{"id":1,"name":"Shop"},{"id":2,"name":"Blog"}]"#.to_vec()),
        ("GET", "/diagrams/shared") => (200, "application/json", br#"[{"id":7,"name":"Team","owner":"ana"}]"#.to_vec()),
        ("GET", "/diagrams/1") => (200, "application/json", br#"{"id":1,"name":"Shop"}"#.to_vec()),
        ("POST", "/diagrams") => (201, "application/json", br#"{"id":3,"name":"Library"}"#.to_vec()),
        ("PATCH", "/diagrams/1") => (200, "application/json", br#"{"id":1,"name":"Store"}"#.to_vec()),
        ("DELETE", "/diagrams/1") => (200, "application/json", b"{}".to_vec()),
        ("GET", "/users/email/ana@example.com") => (200, "application/json", br#"{"id":42,"email":"ana@example.com"}"#.to_vec()),
        ("POST", "/diagrams/1/share/42") => (200, "application/json", b"{}".to_vec()),
        ("POST", "/diagrams/1/generate-code") | ("POST", "/diagrams/1/generate-flutter") => {
            (200, "application/zip", b"PK\x03\x04zip".to_vec())
        }
        ("GET", "/diagrams/404") => (404, "application/json", br#"{"error":"not found"}"#.to_vec()),
        _ => (500, "text/plain", b"unexpected".to_vec()),
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn serve(mut stream: tokio::net::TcpStream, log: Log) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();

    let mut content_length = 0;
    let mut authorization = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "authorization" => authorization = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    let (status, content_type, payload) = respond(&method, &target);
    log.lock().unwrap().push(Recorded {
        method,
        target,
        authorization,
        body,
    });

    let header = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reason(status),
        payload.len()
    );
    let _ = stream.write_all(header.as_bytes()).await;
    let _ = stream.write_all(&payload).await;
    let _ = stream.shutdown().await;
}

async fn start_stub() -> (String, Log) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let server_log = log.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, server_log.clone()));
        }
    });
    (format!("http://127.0.0.1:{port}"), log)
}

fn last(log: &Log) -> Recorded {
    log.lock().unwrap().last().cloned().unwrap()
}

#[tokio::test]
async fn test_list_and_get() {
    let (url, log) = start_stub().await;
    let client = BackendClient::new(&url, "secret");

    let own = client.list_diagrams().await.unwrap();
    assert_eq!(own.len(), 2);
    assert_eq!(own[1].name, "Blog");
    assert_eq!(last(&log).authorization.as_deref(), Some("Bearer secret"));

    let shared = client.list_shared().await.unwrap();
    assert_eq!(shared[0].id, DiagramId(7));
    assert!(shared[0].extra.contains_key("owner"));

    let one = client.get_diagram(DiagramId(1)).await.unwrap();
    assert_eq!(one.name, "Shop");
}

#[tokio::test]
async fn test_create_rename_delete() {
    let (url, log) = start_stub().await;
    let client = BackendClient::new(format!("{url}/"), "secret");

    let created = client.create_diagram("  Library ").await.unwrap();
    assert_eq!(created.id, DiagramId(3));
    let request = last(&log);
    assert_eq!(request.method, "POST");
    assert_eq!(request.body, r#"{"name":"Library"}"#);

    let renamed = client.rename_diagram(DiagramId(1), "Store").await.unwrap();
    assert_eq!(renamed.name, "Store");
    assert_eq!(last(&log).method, "PATCH");

    client.delete_diagram(DiagramId(1)).await.unwrap();
    let request = last(&log);
    assert_eq!((request.method.as_str(), request.target.as_str()), ("DELETE", "/diagrams/1"));
}

#[tokio::test]
async fn test_share_by_email() {
    let (url, log) = start_stub().await;
    let client = BackendClient::new(&url, "secret");

    let user = client
        .share_with_email(DiagramId(1), "ana@example.com")
        .await
        .unwrap();
    assert_eq!(user.id, 42);
    let requests = log.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].target, "/users/email/ana@example.com");
    assert_eq!(requests[1].target, "/diagrams/1/share/42");
}

#[tokio::test]
async fn test_export_uses_defaults() {
    let (url, log) = start_stub().await;
    let client = BackendClient::new(&url, "secret");

    let (name, bytes) = client
        .export_code(DiagramId(1), ArtifactTarget::SpringBoot, None, None)
        .await
        .unwrap();
    assert_eq!(name, "diagram-1-springboot");
    assert!(bytes.starts_with(b"PK"));
    assert_eq!(
        last(&log).target,
        "/diagrams/1/generate-code?projectName=diagram-1-springboot&basePackage=com.example.demo"
    );

    let (name, _) = client
        .export_code(DiagramId(1), ArtifactTarget::Flutter, Some("My App"), Some("org.shop"))
        .await
        .unwrap();
    assert_eq!(name, "my_app");
    assert_eq!(
        last(&log).target,
        "/diagrams/1/generate-flutter?projectName=my_app&basePackage=org.shop"
    );
}

#[tokio::test]
async fn test_http_errors_surface_status_and_body() {
    let (url, _log) = start_stub().await;
    let client = BackendClient::new(&url, "secret");

    match client.get_diagram(DiagramId(404)).await {
        Err(ApiError::Status { status, body }) => {
            assert_eq!(status, 404);
            assert!(body.contains("not found"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}
