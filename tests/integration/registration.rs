use rocket::http::{ContentType, Status};

use crate::common::{register_agent, test_client};

#[test]
fn register_returns_canonical_agent_id() {
    let client = test_client();
    let agent_id = register_agent(&client, "laptop", "demo");
    assert_eq!(agent_id, "laptop/demo");
}

#[test]
fn health_reports_online_agents() {
    let client = test_client();
    register_agent(&client, "laptop", "demo");
    let res = client.get("/api/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["agents_online"], 1);
}

#[test]
fn rpc_list_agents_reflects_registration() {
    let client = test_client();
    register_agent(&client, "laptop", "demo");
    let res = client
        .post("/agent/mcp")
        .header(ContentType::JSON)
        .header(rocket::http::Header::new("X-Machine-Name", "laptop"))
        .header(rocket::http::Header::new("X-Project-Name", "demo"))
        .body(r#"{"tool": "list_agents"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let agents = body.as_array().unwrap();
    assert!(agents.iter().any(|a| a["id"] == "laptop/demo"));
}

#[test]
fn unregister_with_empty_inbox_deletes_the_record() {
    let client = test_client();
    register_agent(&client, "laptop", "demo");
    let res = client
        .post("/agent/api/unregister")
        .header(rocket::http::Header::new("X-Machine-Name", "laptop"))
        .header(rocket::http::Header::new("X-Project-Name", "demo"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["outcome"], "deleted");
}
