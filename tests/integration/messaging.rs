use rocket::http::{ContentType, Header, Status};

use crate::common::{register_agent, test_client};

fn headers(machine: &str, project: &str) -> Vec<Header<'static>> {
    vec![
        Header::new("X-Machine-Name", machine.to_string()),
        Header::new("X-Project-Name", project.to_string()),
    ]
}

#[test]
fn send_then_get_then_ack() {
    let client = test_client();
    register_agent(&client, "laptop", "alice");
    register_agent(&client, "laptop", "bob");

    let mut req = client
        .post("/agent/mcp")
        .header(ContentType::JSON)
        .body(r#"{"tool": "send_message", "params": {"target": "laptop/bob", "message": "hello"}}"#);
    for h in headers("laptop", "alice") {
        req = req.header(h);
    }
    let res = req.dispatch();
    assert_eq!(res.status(), Status::Ok);
    let sent: serde_json::Value = res.into_json().unwrap();
    let msg_id = sent["id"].as_str().unwrap().to_string();

    let mut req = client.get("/agent/api/pending");
    for h in headers("laptop", "bob") {
        req = req.header(h);
    }
    let res = req.dispatch();
    assert_eq!(res.status(), Status::Ok);
    let inbox: serde_json::Value = res.into_json().unwrap();
    assert_eq!(inbox.as_array().unwrap().len(), 1);

    let mut req = client
        .post("/agent/mcp")
        .header(ContentType::JSON)
        .body(format!(r#"{{"tool": "ack_messages", "params": {{"ids": ["{msg_id}"]}}}}"#));
    for h in headers("laptop", "bob") {
        req = req.header(h);
    }
    let res = req.dispatch();
    assert_eq!(res.status(), Status::Ok);

    let mut req = client.get("/agent/api/pending");
    for h in headers("laptop", "bob") {
        req = req.header(h);
    }
    let inbox: serde_json::Value = req.dispatch().into_json().unwrap();
    assert!(inbox.as_array().unwrap().is_empty());
}

#[test]
fn send_to_unregistered_agent_is_rejected() {
    let client = test_client();
    register_agent(&client, "laptop", "alice");

    let mut req = client
        .post("/agent/mcp")
        .header(ContentType::JSON)
        .body(r#"{"tool": "send_message", "params": {"target": "laptop/ghost", "message": "hello"}}"#);
    for h in headers("laptop", "alice") {
        req = req.header(h);
    }
    let res = req.dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "AGENT_NOT_FOUND");
}

#[test]
fn rest_wait_times_out_without_heartbeating() {
    let client = test_client();
    register_agent(&client, "laptop", "bob");

    let mut req = client.get("/agent/api/wait?timeout=1");
    for h in headers("laptop", "bob") {
        req = req.header(h);
    }
    let res = req.dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "timeout");
}
