use rocket::http::{ContentType, Header, Status};

use crate::common::{register_agent, test_client};

#[test]
fn send_message_is_rate_limited_after_ten_in_a_window() {
    let client = test_client();
    register_agent(&client, "laptop", "alice");
    register_agent(&client, "laptop", "bob");

    let mut last_status = Status::Ok;
    for _ in 0..11 {
        let res = client
            .post("/agent/mcp")
            .header(ContentType::JSON)
            .header(Header::new("X-Machine-Name", "laptop"))
            .header(Header::new("X-Project-Name", "alice"))
            .body(r#"{"tool": "send_message", "params": {"target": "laptop/bob", "message": "hi"}}"#)
            .dispatch();
        last_status = res.status();
    }
    assert_eq!(last_status, Status::TooManyRequests);
}
