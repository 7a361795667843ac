use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rex_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rex");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let migrations = root.join("migrations");
    fs::create_dir_all(&migrations).unwrap();
    fs::write(
        migrations.join("001_users.sql"),
        "CREATE TABLE users (id UUID PRIMARY KEY, email TEXT UNIQUE NOT NULL);",
    )
    .unwrap();
    fs::write(
        migrations.join("002_orders.sql"),
        "CREATE TABLE orders (id INT PRIMARY KEY, user_id UUID REFERENCES users(id));\n\
         GRANT SELECT ON orders TO reporting;",
    )
    .unwrap();
    fs::write(migrations.join("README.md"), "not a migration").unwrap();

    let config_content = format!(
        r#"[cache]
dir = "{}/cache"

[server]
bind = "127.0.0.1:7499"
"#,
        root.display()
    );
    let config_path = config_dir.join("rex.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rex(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rex_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rex binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_schema_renders_erd() {
    let (tmp, config) = setup_test_env();
    let dir = tmp.path().join("migrations");
    let (stdout, stderr, success) = run_rex(&config, &["schema", dir.to_str().unwrap()]);
    assert!(success, "schema failed: {}", stderr);
    assert!(stdout.starts_with("erDiagram"));
    assert!(stdout.contains("users ||--o{ orders : \"user_id -> users.id\""));
    assert!(stderr.contains("warning: 002_orders.sql statement 1"));
}

#[test]
fn test_schema_json_and_sql_formats() {
    let (tmp, config) = setup_test_env();
    let dir = tmp.path().join("migrations");

    let (stdout, _, success) =
        run_rex(&config, &["schema", dir.to_str().unwrap(), "--format", "json"]);
    assert!(success);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(report["erd"].as_str().unwrap().starts_with("erDiagram"));
    assert_eq!(report["warnings"].as_array().unwrap().len(), 1);

    let (stdout, _, success) =
        run_rex(&config, &["schema", dir.to_str().unwrap(), "--format", "sql"]);
    assert!(success);
    let users = stdout.find("CREATE TABLE users").unwrap();
    let orders = stdout.find("CREATE TABLE orders").unwrap();
    assert!(users < orders);
}

#[test]
fn test_schema_without_tables_fails() {
    let (tmp, config) = setup_test_env();
    let empty = tmp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();
    fs::write(empty.join("001.sql"), "SELECT 1;").unwrap();

    let (_, stderr, success) = run_rex(&config, &["schema", empty.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("no tables could be extracted"));
}

#[test]
fn test_schema_missing_directory() {
    let (tmp, config) = setup_test_env();
    let missing = tmp.path().join("nope");
    let (_, stderr, success) = run_rex(&config, &["schema", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Not a directory"));
}

#[test]
fn test_cache_clear_by_kind() {
    let (tmp, config) = setup_test_env();
    let cache = tmp.path().join("cache");
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join("main.rs_file_0123456789ab.json"), "{}").unwrap();
    fs::write(cache.join("src_folder_0123456789ab.json"), "{}").unwrap();

    let (stdout, stderr, success) = run_rex(&config, &["cache", "clear", "--kind", "file"]);
    assert!(success, "cache clear failed: {}", stderr);
    assert!(stdout.contains("Removed 1 cache entries"));
    assert!(!cache.join("main.rs_file_0123456789ab.json").exists());
    assert!(cache.join("src_folder_0123456789ab.json").exists());

    let (stdout, _, success) = run_rex(&config, &["cache", "clear"]);
    assert!(success);
    assert!(stdout.contains("Removed 1 cache entries"));
}

#[test]
fn test_cache_clear_rejects_unknown_kind() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_rex(&config, &["cache", "clear", "--kind", "embeddings"]);
    assert!(!success);
    assert!(stderr.contains("unknown cache kind"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[pipeline]\nworkers = 0\n").unwrap();
    let dir = tmp.path().join("migrations");
    let (_, _, success) = run_rex(&bad, &["schema", dir.to_str().unwrap()]);
    assert!(!success);
}

#[test]
fn test_analyze_missing_directory_reports_input_error() {
    let (tmp, config) = setup_test_env();
    let missing = tmp.path().join("nope");
    let (stdout, _, success) = run_rex(
        &config,
        &["analyze", missing.to_str().unwrap(), "--json"],
    );
    assert!(!success);
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
    assert_eq!(events[0]["data"]["kind"], "input");
}
