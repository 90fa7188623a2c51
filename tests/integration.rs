//! End-to-end tests driving the `bkf` binary: init, batch submission,
//! queue draining, fast-fail of unsupported formats, and the cached access
//! layer.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn bkf_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("bkf");
    path
}

/// Minimal valid PDF containing the given phrase. Builds the body then an
/// xref with correct byte offsets so the extractor can parse it.
fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET\n", phrase);
    out.extend_from_slice(
        format!("4 0 obj << /Length {} >> stream\n{}endstream endobj\n", stream.len(), stream)
            .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::create_dir_all(root.join("files")).unwrap();

    // Zero backoff so retries don't slow the suite down.
    let config_content = format!(
        r#"[db]
path = "{}/data/bookflow.sqlite"

[queue]
workers = 2
max_attempts = 3
backoff_base_secs = 0
backoff_cap_secs = 0
poll_interval_ms = 25
"#,
        root.display()
    );

    let config_path = root.join("config").join("bookflow.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_bkf(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = bkf_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run bkf binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Pull `(job_id, document_id)` out of a `queued` line of `bkf submit`.
fn parse_queued_ids(stdout: &str) -> (String, String) {
    let line = stdout
        .lines()
        .find(|l| l.starts_with("queued"))
        .unwrap_or_else(|| panic!("no queued line in output: {}", stdout));
    let job_id = line
        .split("(job ")
        .nth(1)
        .and_then(|s| s.split(',').next())
        .unwrap()
        .to_string();
    let document_id = line
        .split("document ")
        .nth(1)
        .and_then(|s| s.split(')').next())
        .unwrap()
        .to_string();
    (job_id, document_id)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_bkf(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_bkf(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_bkf(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_status_on_empty_queue() {
    let (_tmp, config_path) = setup_test_env();
    run_bkf(&config_path, &["init"]);

    let (stdout, _, success) = run_bkf(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("total:     0"));
}

#[test]
fn test_submit_batch_isolation() {
    let (tmp, config_path) = setup_test_env();
    run_bkf(&config_path, &["init"]);

    let good = tmp.path().join("files").join("good.pdf");
    fs::write(&good, minimal_pdf_with_phrase("ahab returns")).unwrap();
    let missing = tmp.path().join("files").join("missing.pdf");

    let (stdout, stderr, success) = run_bkf(
        &config_path,
        &[
            "submit",
            good.to_str().unwrap(),
            missing.to_str().unwrap(),
            "--principal",
            "tester",
        ],
    );
    assert!(success, "submit failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("total submitted: 2"));
    assert!(stdout.contains("added to queue:  1"));
    assert!(stdout.contains("invalid"));
}

#[test]
fn test_work_drain_processes_pdf_and_get_reports_processed() {
    let (tmp, config_path) = setup_test_env();
    run_bkf(&config_path, &["init"]);

    let pdf = tmp.path().join("files").join("moby.pdf");
    fs::write(&pdf, minimal_pdf_with_phrase("call me ishmael")).unwrap();

    let (stdout, _, success) = run_bkf(
        &config_path,
        &["submit", pdf.to_str().unwrap(), "--principal", "tester"],
    );
    assert!(success);
    let (_job_id, document_id) = parse_queued_ids(&stdout);

    let (stdout, stderr, success) = run_bkf(&config_path, &["work", "--drain"]);
    assert!(success, "work failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("completed: 1"));
    assert!(stdout.contains("failed:    0"));

    let (stdout, _, success) = run_bkf(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("completed: 1"));
    assert!(stdout.contains("waiting:   0"));

    let (stdout, _, success) = run_bkf(&config_path, &["get", &document_id]);
    assert!(success);
    assert!(stdout.contains("\"state\":\"processed\""));
    assert!(stdout.contains("moby.pdf"));
}

#[test]
fn test_unsupported_format_fails_after_exactly_one_attempt() {
    let (tmp, config_path) = setup_test_env();
    run_bkf(&config_path, &["init"]);

    let txt = tmp.path().join("files").join("notes.txt");
    fs::write(&txt, "plain text is not a book").unwrap();

    // text/plain is admitted (the locator is reachable) but has no
    // extraction path, so the job must fast-fail without retries.
    let (stdout, _, success) = run_bkf(
        &config_path,
        &["submit", txt.to_str().unwrap(), "--principal", "tester"],
    );
    assert!(success);
    assert!(stdout.contains("added to queue:  1"));
    let (job_id, document_id) = parse_queued_ids(&stdout);

    let (stdout, _, success) = run_bkf(&config_path, &["work", "--drain"]);
    assert!(success);
    assert!(stdout.contains("failed:    1"));

    let (stdout, _, success) = run_bkf(&config_path, &["job", &job_id]);
    assert!(success);
    assert!(stdout.contains("state:        failed"));
    assert!(stdout.contains("attempts:     1/3"));
    assert!(stdout.contains("unsupported content type: text/plain"));

    let (stdout, _, success) = run_bkf(&config_path, &["get", &document_id]);
    assert!(success);
    assert!(stdout.contains("\"state\":\"error\""));
}

#[test]
fn test_clear_drops_terminal_jobs() {
    let (tmp, config_path) = setup_test_env();
    run_bkf(&config_path, &["init"]);

    let pdf = tmp.path().join("files").join("short.pdf");
    fs::write(&pdf, minimal_pdf_with_phrase("queequeg")).unwrap();
    run_bkf(
        &config_path,
        &["submit", pdf.to_str().unwrap(), "--principal", "tester"],
    );
    run_bkf(&config_path, &["work", "--drain"]);

    let (stdout, _, success) = run_bkf(&config_path, &["clear"]);
    assert!(success);
    assert!(stdout.contains("cleared 1 jobs"));

    let (stdout, _, _) = run_bkf(&config_path, &["status"]);
    assert!(stdout.contains("total:     0"));
}

#[test]
fn test_get_unknown_document_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_bkf(&config_path, &["init"]);

    let (_, stderr, success) = run_bkf(&config_path, &["get", "no-such-id"]);
    assert!(!success);
    assert!(stderr.contains("document not found"));
}

#[test]
fn test_cache_stats_and_popular_reflect_access() {
    let (tmp, config_path) = setup_test_env();
    run_bkf(&config_path, &["init"]);

    let pdf = tmp.path().join("files").join("pequod.pdf");
    fs::write(&pdf, minimal_pdf_with_phrase("starbuck")).unwrap();
    let (stdout, _, _) = run_bkf(
        &config_path,
        &["submit", pdf.to_str().unwrap(), "--principal", "tester"],
    );
    let (_job_id, document_id) = parse_queued_ids(&stdout);
    run_bkf(&config_path, &["work", "--drain"]);

    // Counter rows are seeded at ingestion; the document shows up ranked.
    let (stdout, _, success) = run_bkf(&config_path, &["cache", "popular", "--limit", "5"]);
    assert!(success);
    assert!(stdout.contains(&document_id));

    let (stdout, _, success) = run_bkf(&config_path, &["cache", "stats"]);
    assert!(success);
    assert!(stdout.contains("tracked:      1"));
}
