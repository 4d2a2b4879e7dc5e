//! Integration tests for the tutorstream CLI
//!
//! These run the compiled binary. Tests that need a backend start a local
//! `wiremock` server and point `--api-url` at it.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tutorstream() -> Command {
    let mut cmd = cargo_bin_cmd!("tutorstream");
    cmd.env_remove("TUTORSTREAM_API_URL")
        .env_remove("TUTORSTREAM_API_TOKEN")
        .env_remove("TUTORSTREAM_CONTEXT_WINDOW");
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn init_project(dir: &TempDir) {
    tutorstream()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        tutorstream()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("chat"))
            .stdout(predicate::str::contains("complete"));
    }

    #[test]
    fn test_version() {
        tutorstream().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        tutorstream()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized tutorstream project"));

        assert!(dir.path().join(".tutorstream").is_dir());
        assert!(dir.path().join(".tutorstream/store").is_dir());
        assert!(dir.path().join(".tutorstream/tutorstream.toml").is_file());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = create_temp_project();
        init_project(&dir);

        tutorstream()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_history_empty() {
        let dir = create_temp_project();

        tutorstream()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("history")
            .assert()
            .success()
            .stdout(predicate::str::contains("No messages yet"));
    }

    #[test]
    fn test_react_rejects_unknown_reaction() {
        let dir = create_temp_project();

        tutorstream()
            .current_dir(dir.path())
            .args(["react", "user-1", "sideways"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid reaction"));
    }

    #[test]
    fn test_edit_unknown_message_fails() {
        let dir = create_temp_project();

        tutorstream()
            .current_dir(dir.path())
            .args(["edit", "user-1", "text"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not found"));
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config_commands {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        tutorstream()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No tutorstream.toml found"))
            .stdout(predicate::str::contains("context_window = 10"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = create_temp_project();

        tutorstream()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created tutorstream.toml"));

        let content = fs::read_to_string(dir.path().join(".tutorstream/tutorstream.toml")).unwrap();
        assert!(content.contains("[backend]"));
        assert!(content.contains("[conversation]"));
    }

    #[test]
    fn test_config_validate_no_config() {
        let dir = create_temp_project();

        tutorstream()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults (valid)"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join(".tutorstream/tutorstream.toml"),
            "[backend]\nbase_url = \"localhost\"\n",
        )
        .unwrap();

        tutorstream()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("base_url"));
    }

    #[test]
    fn test_config_show_reads_file() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join(".tutorstream/tutorstream.toml"),
            "[conversation]\ncontext_window = 4\nstreaming = false\n",
        )
        .unwrap();

        tutorstream()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("context_window = 4"))
            .stdout(predicate::str::contains("streaming = false"));
    }
}

// =============================================================================
// Chat against a mock backend
// =============================================================================

mod chat_flow {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_chat_streams_answer_and_persists_it() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(
                        "data: {\"content\":\"Hel\"}\n\ndata: {\"content\":\"lo\"}\n\ndata: {\"done\":true,\"service_used\":\"svc\"}\n\n",
                        "text/event-stream",
                    ),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = create_temp_project();

        tutorstream()
            .current_dir(dir.path())
            .args(["--api-url", &server.uri(), "chat", "Say hello"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Hello"))
            .stdout(predicate::str::contains("svc"));

        tutorstream()
            .current_dir(dir.path())
            .arg("history")
            .assert()
            .success()
            .stdout(predicate::str::contains("Say hello"))
            .stdout(predicate::str::contains("2 message(s)"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_chat_reports_feature_refusal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": "Diagram generation is not available on your plan",
                "feature": "diagram_generation",
                "current_plan": "free",
                "upgrade_message": "Upgrade to Pro for diagrams",
                "upgrade_url": "https://example.com/pricing"
            })))
            .mount(&server)
            .await;

        let dir = create_temp_project();

        tutorstream()
            .current_dir(dir.path())
            .args(["--api-url", &server.uri(), "chat", "Draw a diagram"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Upgrade to Pro for diagrams"))
            .stderr(predicate::str::contains("diagram_generation"));
    }
}
