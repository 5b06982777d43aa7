use rocket::local::blocking::Client;

/// Wrapper around Client that auto-deletes the temp DB on drop, mirroring
/// the teacher's `TestClient` (SQLite WAL mode holds the file open until
/// the connection drops, so the client must go first).
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    let db_path = format!(
        "/tmp/coordinator_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );
    let rocket = agent_coordinator::rocket_with_db(&db_path);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient { client: Some(client), db_path }
}

/// Registers `machine/project` via the REST endpoint and returns the
/// canonical agent id the coordinator assigned.
pub fn register_agent(client: &Client, machine: &str, project: &str) -> String {
    use rocket::http::{ContentType, Status};
    let res = client
        .post("/agent/api/register")
        .header(ContentType::JSON)
        .body(format!(r#"{{"machine": "{machine}", "project": "{project}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["agent_id"].as_str().unwrap().to_string()
}
