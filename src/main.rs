#[rocket::launch]
fn launch() -> _ {
    agent_coordinator::rocket()
}
