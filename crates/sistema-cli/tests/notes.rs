use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "cli-test-token";

fn sistema(home: &std::path::Path, server: &MockServer) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("sistema");
    cmd.env("SISTEMA_HOME", home)
        .env("SISTEMA_API_URL", server.uri())
        .env("SISTEMA_TOKEN", TOKEN);
    cmd
}

#[tokio::test]
async fn test_notes_list_prints_messages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages"))
        .and(header("authorization", "Bearer cli-test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "message": "buy milk"},
            {"id": "b7", "message": "call mom"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    sistema(dir.path(), &server)
        .args(["notes", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1  buy milk"))
        .stdout(predicate::str::contains("b7  call mom"));
}

#[tokio::test]
async fn test_notes_list_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    sistema(dir.path(), &server)
        .args(["notes", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No messages."));
}

#[tokio::test]
async fn test_notes_list_failure_exits_with_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    sistema(dir.path(), &server)
        .args(["notes", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to fetch messages"));
}

#[tokio::test]
async fn test_notes_add_trims_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_json(json!({"message": "call mom"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 2, "message": "call mom"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    sistema(dir.path(), &server)
        .args(["notes", "add", "  call mom "])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created message 2: call mom"));
}

#[tokio::test]
async fn test_notes_add_blank_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    sistema(dir.path(), &server)
        .args(["notes", "add", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Message cannot be empty"));
}

#[tokio::test]
async fn test_notes_edit_updates_message() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/messages/1"))
        .and(body_json(json!({"message": "buy oat milk"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "message": "buy oat milk"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    sistema(dir.path(), &server)
        .args(["notes", "edit", "1", "buy oat milk"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated message 1: buy oat milk"));
}

#[tokio::test]
async fn test_notes_rm_with_yes() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/messages/2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    sistema(dir.path(), &server)
        .args(["notes", "rm", "2", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted message 2."));
}

#[tokio::test]
async fn test_notes_rm_asks_and_confirms() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/messages/2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    sistema(dir.path(), &server)
        .args(["notes", "rm", "2"])
        .write_stdin("y\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Delete message 2? [y/N]"))
        .stdout(predicate::str::contains("Deleted message 2."));
}

#[tokio::test]
async fn test_notes_rm_declined_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    sistema(dir.path(), &server)
        .args(["notes", "rm", "2"])
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Delete cancelled."));
}

#[test]
fn test_notes_without_session_asks_to_log_in() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("sistema")
        .env("SISTEMA_HOME", dir.path())
        .env_remove("SISTEMA_TOKEN")
        .args(["notes", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Run `sistema login` first"));
}
