use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

use mqcloud_cli::client::{ApiError, Client, Instance, InstanceCreateRequest};
use mqcloud_cli::instance_api::InstanceApiClient;

/// Serve exactly one canned HTTP response on a loopback listener and hand the
/// raw request back to the test.
fn serve_once(status: u16, content_type: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let content_type = content_type.to_string();
    let body = body.to_string();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut raw = Vec::new();
        let mut chunk = [0u8; 1024];

        let header_end = loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break raw.len();
            }
            raw.extend_from_slice(&chunk[..n]);
            if let Some(pos) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);
        while raw.len() < header_end + content_length {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
        }

        let reply = format!(
            "HTTP/1.1 {status} Status\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(reply.as_bytes()).unwrap();
        String::from_utf8_lossy(&raw).to_string()
    });

    (format!("http://{addr}"), handle)
}

#[test]
fn list_instances_parses_the_response() {
    let body = r#"[{"id": 7, "plan": "squirrel-1", "region": "amazon-web-services::us-east-1", "name": "broker-a"}]"#;
    let (base_url, server) = serve_once(200, "application/json", body);

    let client = Client::with_base_url("main-key", base_url);
    let instances: Vec<Instance> = client.list_instances().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].id, 7);
    assert_eq!(instances[0].name, "broker-a");

    let request = server.join().unwrap();
    assert!(request.starts_with("GET /instances HTTP/1.1"));
    assert!(request.to_ascii_lowercase().contains("authorization: basic "));
}

#[test]
fn non_2xx_becomes_api_error_with_parsed_message() {
    let (base_url, server) = serve_once(404, "application/json", r#"{"error": "no such instance"}"#);

    let client = Client::with_base_url("main-key", base_url);
    let err = client.get_instance(99).unwrap_err();
    match &err {
        ApiError::Status { status, message } => {
            assert_eq!(*status, 404);
            assert_eq!(message, "no such instance");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.to_string(), "API error (404): no such instance");
    server.join().unwrap();
}

#[test]
fn unparseable_error_body_is_passed_through() {
    let (base_url, server) = serve_once(500, "text/plain", "upstream exploded");

    let client = Client::with_base_url("main-key", base_url);
    let err = client.list_vpcs().unwrap_err();
    assert_eq!(err.to_string(), "API error (500): upstream exploded");
    server.join().unwrap();
}

#[test]
fn create_instance_sends_form_fields() {
    let (base_url, server) = serve_once(
        200,
        "application/json",
        r#"{"id": 11, "url": "amqps://host", "apikey": "instance-key"}"#,
    );

    let client = Client::with_base_url("main-key", base_url);
    let req = InstanceCreateRequest {
        name: "my-broker".to_string(),
        plan: "squirrel-1".to_string(),
        region: "amazon-web-services::us-east-1".to_string(),
        tags: vec!["prod".to_string()],
        ..Default::default()
    };
    let resp = client.create_instance(&req).unwrap();
    assert_eq!(resp.id, 11);
    assert_eq!(resp.apikey, "instance-key");

    let request = server.join().unwrap();
    assert!(request.starts_with("POST /instances HTTP/1.1"));
    assert!(request.contains("name=my-broker"));
    assert!(request.contains("plan=squirrel-1"));
}

#[test]
fn node_actions_post_the_node_list_as_json() {
    let (base_url, server) = serve_once(200, "application/json", "");

    let client = InstanceApiClient::with_base_url("instance-key", base_url);
    client.restart_rabbitmq(&["node-1".to_string()]).unwrap();

    let request = server.join().unwrap();
    assert!(request.starts_with("POST /actions/restart HTTP/1.1"));
    assert!(request.contains("node-1"));
}

#[test]
fn node_actions_without_nodes_send_no_body() {
    let (base_url, server) = serve_once(200, "application/json", "");

    let client = InstanceApiClient::with_base_url("instance-key", base_url);
    client.restart_cluster().unwrap();

    let request = server.join().unwrap();
    assert!(request.starts_with("POST /actions/cluster-restart HTTP/1.1"));
}
