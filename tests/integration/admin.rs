use rocket::http::{ContentType, Status};

use crate::common::test_client;

#[test]
fn create_list_and_revoke_key_round_trip() {
    let client = test_client();

    let res = client
        .post("/admin/api/keys")
        .header(ContentType::JSON)
        .body(r#"{"agent_pattern": "laptop/*", "description": "ci key"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let created: serde_json::Value = res.into_json().unwrap();
    let key_id = created["key_id"].as_str().unwrap().to_string();
    assert!(!created["token"].as_str().unwrap().is_empty());

    let res = client.get("/admin/api/keys").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let keys: serde_json::Value = res.into_json().unwrap();
    let keys = keys.as_array().unwrap();
    assert!(keys.iter().any(|k| k["key_id"] == key_id));
    assert!(keys.iter().all(|k| k.get("bcrypt_hash").is_none()));

    let res = client.delete(format!("/admin/api/keys/{key_id}")).dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/admin/api/keys").dispatch();
    let keys: serde_json::Value = res.into_json().unwrap();
    let revoked = keys.as_array().unwrap().iter().find(|k| k["key_id"] == key_id).unwrap();
    assert!(revoked["revoked_at"].is_string());
}

#[test]
fn revoking_unknown_key_id_is_rejected() {
    let client = test_client();
    let res = client.delete("/admin/api/keys/does-not-exist").dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn audit_log_records_key_creation() {
    let client = test_client();
    let res = client
        .post("/admin/api/keys")
        .header(ContentType::JSON)
        .body(r#"{"agent_pattern": "laptop/*"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/admin/api/audit").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let entries: serde_json::Value = res.into_json().unwrap();
    let entries = entries.as_array().unwrap();
    assert!(entries.iter().any(|e| e["action"] == "register_key"));
}

#[test]
fn audit_log_respects_limit() {
    let client = test_client();
    for _ in 0..3 {
        client
            .post("/admin/api/keys")
            .header(ContentType::JSON)
            .body(r#"{"agent_pattern": "laptop/*"}"#)
            .dispatch();
    }
    let res = client.get("/admin/api/audit?limit=1").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let entries: serde_json::Value = res.into_json().unwrap();
    assert_eq!(entries.as_array().unwrap().len(), 1);
}
