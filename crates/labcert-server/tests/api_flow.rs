use std::sync::Arc;

use labcert_core::report::{RenderError, ReportRenderer};
use labcert_core::{Lab, LabConfig, NewStaffMember, ReportData, Role};
use labcert_server::{build_router, ApiConfig, AppState};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const SECRET: &str = "integration-secret-0123456789";

struct Server {
    addr: std::net::SocketAddr,
    clerk: String,
    evaluator: String,
    validator: String,
}

struct FailingRenderer;

impl ReportRenderer for FailingRenderer {
    fn render(&self, _template: &str, _data: &ReportData) -> Result<Vec<u8>, RenderError> {
        Err(RenderError::Failed("font cache unavailable".into()))
    }
}

async fn start(lab: Lab, diagnostics: bool) -> Server {
    let mut ids = Vec::new();
    for (name, email, role) in [
        ("Dana Entry", "dana@lab.test", Role::DataEntry),
        ("Eva Ruiz", "eva@lab.test", Role::Evaluator),
        ("Victor Vega", "victor@lab.test", Role::Validator),
    ] {
        let member = lab
            .ensure_staff(&NewStaffMember {
                name: name.into(),
                email: email.into(),
                roles: vec![role],
            })
            .expect("seed staff");
        ids.push((member.id, member.name, role));
    }

    let api = ApiConfig {
        token_secret: SECRET.to_string(),
        max_upload_bytes: 256 * 1024,
        diagnostics,
        ..ApiConfig::default()
    };
    let state = AppState::new(lab, api);
    let tokens: Vec<String> = ids
        .iter()
        .map(|(id, name, role)| state.tokens.issue(*id, name, &[*role]).expect("issue token"))
        .collect();

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });

    Server {
        addr,
        clerk: tokens[0].clone(),
        evaluator: tokens[1].clone(),
        validator: tokens[2].clone(),
    }
}

async fn start_default() -> Server {
    start(
        Lab::open_in_memory(LabConfig::default()).expect("open lab"),
        false,
    )
    .await
}

async fn send_raw(
    method: &str,
    addr: std::net::SocketAddr,
    path: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> (u16, String, Vec<u8>) {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect server");
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    for (k, v) in headers {
        req.push_str(&format!("{k}: {v}\r\n"));
    }
    req.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    stream
        .write_all(req.as_bytes())
        .await
        .expect("write request head");
    if !body.is_empty() {
        stream.write_all(body).await.expect("write request body");
    }
    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .expect("read response");
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("http response separator");
    let head = String::from_utf8(response[..split].to_vec()).expect("response head utf8");
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("http status");
    (status, head, response[split + 4..].to_vec())
}

fn header_value(headers: &str, name: &str) -> Option<String> {
    let prefix = format!("{}:", name.to_ascii_lowercase());
    headers
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with(&prefix))
        .map(|line| line.split_once(':').map_or("", |(_, v)| v).trim().to_string())
}

async fn call(
    server: &Server,
    method: &str,
    path: &str,
    token: &str,
    body: Option<Value>,
) -> (u16, Value) {
    let auth = format!("Bearer {token}");
    let payload = body.map(|b| b.to_string()).unwrap_or_default();
    let mut headers = vec![("Authorization", auth.as_str())];
    if !payload.is_empty() {
        headers.push(("Content-Type", "application/json"));
    }
    let (status, _, bytes) = send_raw(method, server.addr, path, &headers, payload.as_bytes()).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

async fn seed_water_sample(server: &Server) -> (i64, i64) {
    let (status, requester) = call(
        server,
        "POST",
        "/requesters",
        &server.clerk,
        Some(json!({
            "name": "Acueducto Norte",
            "address": null,
            "contact": null,
            "national_id": "00100000001"
        })),
    )
    .await;
    assert_eq!(status, 201, "{requester}");

    let (status, parameter) = call(
        server,
        "POST",
        "/parameters",
        &server.validator,
        Some(json!({"name": "pH", "sample_type": "water", "unit": null})),
    )
    .await;
    assert_eq!(status, 201);
    let parameter_id = parameter["id"].as_i64().expect("parameter id");

    let (status, norm) = call(
        server,
        "PUT",
        &format!("/parameters/{parameter_id}/norm"),
        &server.validator,
        Some(json!({"operator": "BETWEEN", "lower": 6.5, "upper": 8.5})),
    )
    .await;
    assert_eq!(status, 200, "{norm}");

    let (status, sample) = call(
        server,
        "POST",
        "/samples",
        &server.clerk,
        Some(json!({
            "sample_type": "Agua",
            "date": "2024-01-15",
            "time": "09:30",
            "requester_id": requester["id"]
        })),
    )
    .await;
    assert_eq!(status, 201, "{sample}");
    assert_eq!(sample["code"], "W-000001");
    (sample["id"].as_i64().expect("sample id"), parameter_id)
}

async fn evaluate(server: &Server, sample_id: i64, parameter_id: i64) {
    let (status, staff) = call(server, "GET", "/staff?role=evaluator", &server.validator, None).await;
    assert_eq!(status, 200);
    let evaluator_id = staff[0]["id"].as_i64().expect("evaluator id");

    let (status, _) = call(
        server,
        "POST",
        &format!("/samples/{sample_id}/assign"),
        &server.validator,
        Some(json!({"evaluator_id": evaluator_id, "comment": "priority"})),
    )
    .await;
    assert_eq!(status, 200);

    let (status, _) = call(
        server,
        "POST",
        "/tests",
        &server.evaluator,
        Some(json!({
            "sample_id": sample_id,
            "parameter_id": parameter_id,
            "result": "7,2",
            "within_norm": true
        })),
    )
    .await;
    assert_eq!(status, 201);
}

#[tokio::test]
async fn health_is_public_and_echoes_request_id() {
    let server = start_default().await;
    let (status, head, body) = send_raw(
        "GET",
        server.addr,
        "/health",
        &[("x-request-id", "req-health-1")],
        b"",
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(header_value(&head, "x-request-id").as_deref(), Some("req-health-1"));
    let body: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_or_bad_tokens_are_rejected() {
    let server = start_default().await;

    let (status, _, body) = send_raw(
        "GET",
        server.addr,
        "/samples/pending",
        &[("x-request-id", "req-anon")],
        b"",
    )
    .await;
    assert_eq!(status, 401);
    let body: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(body["error"]["code"], "unauthenticated");
    assert_eq!(body["error"]["request_id"], "req-anon");

    let (status, body) = call(&server, "GET", "/samples/pending", "abc.def", None).await;
    assert_eq!(status, 401, "{body}");

    let (status, body) = call(&server, "GET", "/samples/pending", &server.evaluator, None).await;
    assert_eq!(status, 403);
    assert_eq!(body["error"]["code"], "forbidden");
}

#[tokio::test]
async fn full_certification_over_http() {
    let server = start_default().await;
    let (sample_id, parameter_id) = seed_water_sample(&server).await;

    let (status, pending) = call(&server, "GET", "/samples/pending", &server.validator, None).await;
    assert_eq!(status, 200);
    assert_eq!(pending.as_array().map(Vec::len), Some(1));

    evaluate(&server, sample_id, parameter_id).await;

    let (status, mine) = call(&server, "GET", "/samples/assigned", &server.evaluator, None).await;
    assert_eq!(status, 200);
    assert_eq!(mine[0]["code"], "W-000001");

    let (status, history) = call(
        &server,
        "GET",
        &format!("/samples/{sample_id}/assignments"),
        &server.validator,
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(history[0]["comment"], "priority");
    assert_eq!(mine[0]["evaluator_name"], "Eva Ruiz");

    let (status, params) = call(
        &server,
        "GET",
        &format!("/samples/{sample_id}/parameters"),
        &server.evaluator,
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(params[0]["saved_result"], "7,2");

    let (status, created) = call(
        &server,
        "POST",
        &format!("/samples/{sample_id}/complete"),
        &server.evaluator,
        Some(json!({"fit_for_consumption": true})),
    )
    .await;
    assert_eq!(status, 201, "{created}");
    assert_eq!(created["version"], 1);
    let report_id = created["report_id"].as_i64().expect("report id");

    let (status, history) = call(
        &server,
        "GET",
        &format!("/reports/by-sample/{sample_id}"),
        &server.clerk,
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(history[0]["url"], format!("/reports/{report_id}/file"));
    assert_eq!(history[0]["state"], "created");

    let auth = format!("Bearer {}", server.validator);
    let (status, head, pdf) = send_raw(
        "GET",
        server.addr,
        &format!("/reports/{report_id}/file"),
        &[("Authorization", auth.as_str())],
        b"",
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(header_value(&head, "content-type").as_deref(), Some("application/pdf"));
    assert!(header_value(&head, "content-disposition")
        .unwrap_or_default()
        .contains("report-W-000001-v1.pdf"));
    assert!(pdf.starts_with(b"%PDF-"));

    let (status, reviewed) = call(
        &server,
        "POST",
        &format!("/reports/{report_id}/validate"),
        &server.validator,
        Some(json!({"action": "validated"})),
    )
    .await;
    assert_eq!(status, 200, "{reviewed}");
    assert_eq!(reviewed["state"], "validated");

    let (status, again) = call(
        &server,
        "POST",
        &format!("/reports/{report_id}/validate"),
        &server.validator,
        Some(json!({"action": "returned"})),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(again["error"]["code"], "conflict");

    let (status, validated) = call(&server, "GET", "/samples/validated", &server.validator, None).await;
    assert_eq!(status, 200);
    assert_eq!(validated[0]["report_version"], 1);
}

#[tokio::test]
async fn uploaded_pdf_round_trips() {
    let server = start_default().await;
    let (sample_id, parameter_id) = seed_water_sample(&server).await;
    let auth = format!("Bearer {}", server.evaluator);

    let mut pdf = b"%PDF-1.7\n".to_vec();
    pdf.extend((0..=255u8).cycle().take(4096));

    // Not assigned yet
    let (status, _, body) = send_raw(
        "POST",
        server.addr,
        &format!("/reports/upload?sample_id={sample_id}&filename=signed.pdf"),
        &[("Authorization", auth.as_str())],
        &pdf,
    )
    .await;
    assert_eq!(status, 409);
    let body: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(body["error"]["code"], "precondition_failed");

    evaluate(&server, sample_id, parameter_id).await;
    let (status, _, body) = send_raw(
        "POST",
        server.addr,
        &format!("/reports/upload?sample_id={sample_id}&filename=signed.pdf"),
        &[
            ("Authorization", auth.as_str()),
            ("Content-Type", "application/pdf"),
        ],
        &pdf,
    )
    .await;
    assert_eq!(status, 201);
    let created: Value = serde_json::from_slice(&body).expect("json");
    let report_id = created["report_id"].as_i64().expect("report id");

    let (status, _, file) = send_raw(
        "GET",
        server.addr,
        &format!("/reports/{report_id}/file"),
        &[("Authorization", auth.as_str())],
        b"",
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(file, pdf);

    let (status, _, body) = send_raw(
        "POST",
        server.addr,
        &format!("/reports/upload?sample_id={sample_id}"),
        &[("Authorization", auth.as_str())],
        b"not a pdf",
    )
    .await;
    assert_eq!(status, 400);
    let body: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn staff_accounts_are_managed_by_validators() {
    let server = start_default().await;
    let new_member = json!({
        "name": "Luis Pena",
        "email": "luis@lab.test",
        "roles": ["evaluator"]
    });

    let (status, _) = call(&server, "POST", "/staff", &server.evaluator, Some(new_member.clone())).await;
    assert_eq!(status, 403);

    let (status, created) = call(&server, "POST", "/staff", &server.validator, Some(new_member.clone())).await;
    assert_eq!(status, 201, "{created}");
    let luis = created["id"].as_i64().expect("staff id");
    assert_eq!(created["roles"], json!(["evaluator"]));

    let (status, again) = call(&server, "POST", "/staff", &server.validator, Some(new_member)).await;
    assert_eq!(status, 409);
    assert_eq!(again["error"]["code"], "conflict");

    let (status, updated) = call(
        &server,
        "PUT",
        &format!("/staff/{luis}"),
        &server.validator,
        Some(json!({
            "name": "Luis Pena",
            "email": "luis@lab.test",
            "roles": ["Evaluador", "validator"]
        })),
    )
    .await;
    assert_eq!(status, 200, "{updated}");
    assert_eq!(updated["roles"], json!(["evaluator", "validator"]));

    let (status, body) = call(&server, "DELETE", &format!("/staff/{luis}"), &server.validator, None).await;
    assert_eq!(status, 204, "{body}");
    let (_, evaluators) = call(&server, "GET", "/staff?role=evaluator", &server.validator, None).await;
    assert!(evaluators
        .as_array()
        .expect("array")
        .iter()
        .all(|m| m["id"] != luis));

    let (status, found) = call(&server, "GET", "/staff?q=pena", &server.validator, None).await;
    assert_eq!(status, 200);
    assert_eq!(found.as_array().map(Vec::len), Some(1));
    assert_eq!(found[0]["active"], false);

    let (status, back) = call(
        &server,
        "POST",
        &format!("/staff/{luis}/activate"),
        &server.validator,
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(back["active"], true);

    let (_, me) = call(&server, "GET", "/staff?q=victor", &server.validator, None).await;
    let my_id = me[0]["id"].as_i64().expect("validator id");
    let (status, body) = call(&server, "DELETE", &format!("/staff/{my_id}"), &server.validator, None).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "precondition_failed");

    let (status, roles) = call(&server, "GET", "/staff/roles", &server.validator, None).await;
    assert_eq!(status, 200);
    assert_eq!(roles, json!(["data_entry", "evaluator", "validator"]));
}

#[tokio::test]
async fn retire_twice_conflicts() {
    let server = start_default().await;
    let (sample_id, _) = seed_water_sample(&server).await;

    let (status, _) = call(&server, "DELETE", &format!("/samples/{sample_id}"), &server.clerk, None).await;
    assert_eq!(status, 204);
    let (status, body) = call(&server, "DELETE", &format!("/samples/{sample_id}"), &server.clerk, None).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "conflict");
    let (status, _) = call(&server, "DELETE", "/samples/999", &server.clerk, None).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() {
    let server = start_default().await;
    let auth = format!("Bearer {}", server.clerk);
    let (status, _, body) = send_raw(
        "POST",
        server.addr,
        "/samples",
        &[
            ("Authorization", auth.as_str()),
            ("Content-Type", "application/json"),
        ],
        b"{\"sample_type\": ",
    )
    .await;
    assert_eq!(status, 400);
    let body: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(body["error"]["code"], "validation_error");

    let (status, body) = call(
        &server,
        "POST",
        "/samples",
        &server.clerk,
        Some(json!({"sample_type": "water", "date": "2024-01-15", "time": "09:30", "requester_id": 42})),
    )
    .await;
    assert_eq!(status, 422);
    assert_eq!(body["error"]["code"], "unknown_reference");
}

#[tokio::test]
async fn internal_errors_are_redacted_unless_diagnostics() {
    for diagnostics in [false, true] {
        let lab = Lab::open_in_memory(LabConfig::default())
            .expect("open lab")
            .with_renderer(Arc::new(FailingRenderer));
        let server = start(lab, diagnostics).await;
        let (sample_id, parameter_id) = seed_water_sample(&server).await;
        evaluate(&server, sample_id, parameter_id).await;

        let (status, body) = call(
            &server,
            "POST",
            &format!("/samples/{sample_id}/complete"),
            &server.evaluator,
            Some(json!({"fit_for_consumption": true})),
        )
        .await;
        assert_eq!(status, 500);
        let message = body["error"]["message"].as_str().unwrap_or_default();
        if diagnostics {
            assert!(message.contains("font cache unavailable"), "{message}");
        } else {
            assert_eq!(message, "internal server error");
        }

        let (_, sample) = call(&server, "GET", &format!("/samples/{sample_id}"), &server.validator, None).await;
        assert_eq!(sample["state"], "in_analysis");
    }
}
