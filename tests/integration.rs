// Integration test suite for the agent coordinator.
//
// Organized into focused modules by concern. All modules share
// common::TestClient for database lifecycle management.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/admin.rs"]
mod admin;
#[path = "integration/messaging.rs"]
mod messaging;
#[path = "integration/rate_limiting.rs"]
mod rate_limiting;
#[path = "integration/registration.rs"]
mod registration;
