use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kb_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kb");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("knowledge_base");
    fs::create_dir_all(docs_dir.join("theory")).unwrap();
    fs::write(
        docs_dir.join("leadership.md"),
        "# Leadership\n\nTransformational leadership inspires change.\n\nServant leaders put the team first.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("theory/motivation.txt"),
        "Expectancy theory links effort, performance and reward.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("culture.txt"),
        "Organizational culture is the shared assumptions of a group.",
    )
    .unwrap();

    let config_content = format!(
        r#"[chunking]
chunk_size = 200
chunk_overlap = 40

[paths]
knowledge_base = "{root}/knowledge_base"
index_storage = "{root}/vector_db"

[retrieval]
top_k = 2

[logging]
level = "warn"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("kb.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kb_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("KNOWLEDGE_BASE_PATH")
        .env_remove("VECTOR_DB_PATH")
        .env_remove("CHUNK_SIZE")
        .env_remove("CHUNK_OVERLAP")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kb binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_builds_index() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kb(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Knowledge base initialized with 3 chunks."));
    assert!(tmp.path().join("vector_db/faiss_index/docstore.json").exists());
    assert!(tmp.path().join("vector_db/metadata.pkl").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_kb(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (stdout, _, success2) = run_kb(&config_path, &["init"]);
    assert!(success2, "Second init failed");
    assert!(stdout.contains("3 chunks"));
}

#[test]
fn test_init_empty_knowledge_base_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("knowledge_base")).unwrap();

    let (_, _, success) = run_kb(&config_path, &["init"]);
    assert!(!success, "init on an empty knowledge base should fail");
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();
    run_kb(&config_path, &["init"]);

    let (stdout, stderr, success) = run_kb(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Status:          initialized"));
    assert!(stdout.contains("Document Count:  3"));
    assert!(stdout.contains("feature-hash-384"));

    let (json_out, _, success) = run_kb(&config_path, &["stats", "--json"]);
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(&json_out).unwrap();
    assert_eq!(value["state"], "loaded");
    assert_eq!(value["document_count"], 3);
}

#[test]
fn test_update_picks_up_new_files() {
    let (tmp, config_path) = setup_test_env();
    run_kb(&config_path, &["init"]);

    fs::write(
        tmp.path().join("knowledge_base/conflict.md"),
        "Conflict resolution requires active listening.",
    )
    .unwrap();

    let (stdout, stderr, success) = run_kb(&config_path, &["update"]);
    assert!(success, "update failed: {}", stderr);
    assert!(stdout.contains("updated with 4 chunks"));
}

#[test]
fn test_search_ranks_matching_file_first() {
    let (_tmp, config_path) = setup_test_env();
    run_kb(&config_path, &["init"]);

    let (stdout, stderr, success) = run_kb(&config_path, &["search", "expectancy theory", "-k", "1"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.starts_with("1. ["));
    assert!(stdout.contains("motivation.txt (TXT)"));
    assert!(!stdout.contains("2. ["));
}

#[test]
fn test_search_without_index_builds_it() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kb(&config_path, &["search", "culture"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("culture.txt"));
}

#[test]
fn test_search_with_nothing_to_load_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("knowledge_base")).unwrap();

    let (_, stderr, success) = run_kb(&config_path, &["search", "culture"]);
    assert!(!success);
    assert!(stderr.contains("kb init"));
}

#[test]
fn test_ask_prints_answer_and_sources() {
    let (_tmp, config_path) = setup_test_env();
    run_kb(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_kb(&config_path, &["ask", "What is transformational leadership?"]);
    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains("QUESTION: What is transformational leadership?"));
    assert!(stdout.contains("Source: leadership.md"));
    assert!(stdout.contains("  - leadership.md (MD)"));

    let (json_out, _, success) = run_kb(&config_path, &["ask", "leadership", "--json"]);
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(&json_out).unwrap();
    assert_eq!(value["question"], "leadership");
    assert_eq!(value["sources"][0]["filename"], "leadership.md");
    assert_eq!(value["sources"][0]["type"], "MD");
}

#[test]
fn test_env_overrides_without_config_file() {
    let (tmp, _config_path) = setup_test_env();
    let missing_config = tmp.path().join("config/missing.toml");

    let output = Command::new(kb_binary())
        .arg("--config")
        .arg(&missing_config)
        .arg("init")
        .env("KNOWLEDGE_BASE_PATH", tmp.path().join("knowledge_base"))
        .env("VECTOR_DB_PATH", tmp.path().join("env_db"))
        .env("CHUNK_SIZE", "500")
        .env("CHUNK_OVERLAP", "50")
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(tmp.path().join("env_db/metadata.pkl").exists());
}

#[test]
fn test_invalid_chunking_rejected() {
    let (tmp, _config_path) = setup_test_env();
    let bad_config = tmp.path().join("config/bad.toml");
    fs::write(&bad_config, "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap();

    let (_, stderr, success) = run_kb(&bad_config, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("chunk_overlap"));
}
