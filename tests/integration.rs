use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn leads_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("leads");
    path
}

fn write_zip(path: &Path, members: &[(&str, &str)]) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, body) in members {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// Temp dir with a config and an archive of two CSV exports.
fn setup_test_env(provider: &str) -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let embedding = match provider {
        "hash" => "[embedding]\nprovider = \"hash\"\ndims = 64\n".to_string(),
        _ => "[embedding]\nprovider = \"disabled\"\n".to_string(),
    };
    let config_content = format!(
        r#"[db]
path = "{root}/data/leads.sqlite"

[index]
dir = "{root}/data/index"
backend = "hnsw"
initial_capacity = 4
growth_slack = 4

[ingest]
batch_size = 2
status_path = "{root}/data/status.json"

{embedding}
[retrieval]
default_k = 10
hybrid_alpha = 0.5
"#,
        root = root.display(),
        embedding = embedding
    );
    let config_path = config_dir.join("leads.toml");
    fs::write(&config_path, config_content).unwrap();

    let archive = root.join("exports.zip");
    write_zip(
        &archive,
        &[
            (
                "instagram/a.csv",
                "username,name,bio,followerCount,url\n\
                 user1,Alpha,specialty coffee roaster,1200,https://alpha.example\n\
                 user2,Beta,vegan bakery and cafe,310,\n\
                 user3,Gamma,trail running coach,95,\n",
            ),
            (
                "instagram/b.csv",
                "username,name,description,followers\n\
                 user4,Delta,coffee cart for weddings,40\n\
                 user5,Epsilon,wedding photographer,2000\n",
            ),
        ],
    );

    (tmp, config_path, archive)
}

fn run_leads(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = leads_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run leads binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn ingest_args<'a>(archive: &'a str, extra: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec![
        "ingest",
        "--zip",
        archive,
        "--pattern",
        "*.csv",
        "--dataset",
        "instagram",
        "--progress",
        "off",
    ];
    args.extend_from_slice(extra);
    args
}

#[test]
fn test_init_creates_store() {
    let (_tmp, config_path, _) = setup_test_env("disabled");

    let (stdout, stderr, success) = run_leads(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, again) = run_leads(&config_path, &["init"]);
    assert!(again, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_lexical_only_and_search() {
    let (_tmp, config_path, archive) = setup_test_env("disabled");
    let archive = archive.to_str().unwrap();

    let (stdout, stderr, success) =
        run_leads(&config_path, &ingest_args(archive, &["--no-vectors"]));
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files: 2 completed"), "got: {}", stdout);
    assert!(stdout.contains("rows: 5 read, 5 new"), "got: {}", stdout);

    let (stdout, _, success) = run_leads(&config_path, &["search", "Alpha", "--alpha", "0"]);
    assert!(success);
    assert!(stdout.starts_with("1. "), "got: {}", stdout);
    assert!(stdout.contains("user1"), "got: {}", stdout);
    assert!(!stdout.contains("user2"));
}

#[test]
fn test_ingest_without_embedder_requires_no_vectors() {
    let (_tmp, config_path, archive) = setup_test_env("disabled");
    let archive = archive.to_str().unwrap();

    let (_, stderr, success) = run_leads(&config_path, &ingest_args(archive, &[]));
    assert!(!success);
    assert!(stderr.contains("--no-vectors"), "got: {}", stderr);
}

#[test]
fn test_ingest_is_idempotent() {
    let (_tmp, config_path, archive) = setup_test_env("hash");
    let archive = archive.to_str().unwrap();

    let (stdout1, _, ok1) = run_leads(&config_path, &ingest_args(archive, &[]));
    assert!(ok1);
    assert!(stdout1.contains("vectors: 5 added"), "got: {}", stdout1);

    let (stdout2, _, ok2) = run_leads(&config_path, &ingest_args(archive, &[]));
    assert!(ok2);
    assert!(stdout2.contains("0 completed, 2 skipped"), "got: {}", stdout2);
    assert!(stdout2.contains("vectors: 0 added"), "got: {}", stdout2);
}

#[test]
fn test_zero_match_pattern_fails() {
    let (_tmp, config_path, archive) = setup_test_env("disabled");
    let archive = archive.to_str().unwrap();

    let (_, stderr, success) = run_leads(
        &config_path,
        &[
            "ingest",
            "--zip",
            archive,
            "--pattern",
            "*.xlsx",
            "--dataset",
            "instagram",
            "--no-vectors",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("matched no members"), "got: {}", stderr);

    let (stdout, _, _) = run_leads(&config_path, &["checkpoints"]);
    assert!(stdout.contains("No completed files."));
}

#[test]
fn test_limit_then_resume() {
    let (_tmp, config_path, archive) = setup_test_env("disabled");
    let archive = archive.to_str().unwrap();

    let (stdout, _, ok) = run_leads(
        &config_path,
        &ingest_args(archive, &["--no-vectors", "--limit", "4"]),
    );
    assert!(ok);
    assert!(stdout.contains("stopped at row limit"), "got: {}", stdout);

    let (stdout, _, _) = run_leads(&config_path, &["checkpoints", "--dataset", "instagram"]);
    assert!(stdout.contains("instagram/a.csv"));
    assert!(!stdout.contains("instagram/b.csv"));

    let (stdout, _, ok) = run_leads(&config_path, &ingest_args(archive, &["--no-vectors"]));
    assert!(ok);
    assert!(stdout.contains("1 completed, 1 skipped"), "got: {}", stdout);
    assert!(stdout.contains("rows: 2 read, 1 new"), "got: {}", stdout);
}

#[test]
fn test_search_explain_json() {
    let (_tmp, config_path, archive) = setup_test_env("hash");
    let archive = archive.to_str().unwrap();
    run_leads(&config_path, &ingest_args(archive, &[]));

    let (stdout, stderr, success) = run_leads(
        &config_path,
        &["search", "coffee", "--k", "3", "--explain"],
    );
    assert!(success, "search failed: {}", stderr);
    let results: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let results = results.as_array().unwrap();
    assert!(!results.is_empty() && results.len() <= 3);
    for r in results {
        assert!(r["score"].as_f64().unwrap() > 0.0);
        assert_eq!(r["explain"]["vector_weight"].as_f64().unwrap(), 0.5);
    }
    let usernames: Vec<&str> = results
        .iter()
        .map(|r| r["username"].as_str().unwrap())
        .collect();
    assert!(usernames.contains(&"user1") && usernames.contains(&"user4"));
}

#[test]
fn test_search_dataset_filter() {
    let (_tmp, config_path, archive) = setup_test_env("disabled");
    let archive = archive.to_str().unwrap();
    run_leads(&config_path, &ingest_args(archive, &["--no-vectors"]));

    let (stdout, _, success) = run_leads(
        &config_path,
        &["search", "coffee", "--datasets", "tiktok,youtube"],
    );
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_status_and_repair() {
    let (_tmp, config_path, archive) = setup_test_env("hash");
    let archive = archive.to_str().unwrap();
    run_leads(&config_path, &ingest_args(archive, &[]));

    let (stdout, stderr, success) = run_leads(&config_path, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("Records:     5"), "got: {}", stdout);
    assert!(stdout.contains("hnsw, 64 dims"), "got: {}", stdout);
    assert!(stdout.contains("Last ingest (instagram)"));

    let (stdout, _, success) = run_leads(&config_path, &["repair"]);
    assert!(success);
    assert!(stdout.contains("5 entries (aligned)"), "got: {}", stdout);
}
