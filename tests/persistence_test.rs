#![cfg(feature = "storage-rocksdb")]

mod common;

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: register and fund a client
    let mut first = tempfile::NamedTempFile::new().unwrap();
    writeln!(first, "{}", common::BOOTSTRAP[1]).unwrap();
    writeln!(first, r#"{{"op": "deposit", "actor": 1, "amount": "100"}}"#).unwrap();

    let mut cmd1 = Command::new(cargo_bin!("srvana"));
    cmd1.arg("run").arg(first.path()).arg("--db-path").arg(&db_path);

    let output1 = cmd1.output().expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("1,client,100.00,0.00,0.00"));

    // 2. Second run: the user is recovered, not registered again
    let mut second = tempfile::NamedTempFile::new().unwrap();
    writeln!(second, r#"{{"op": "deposit", "actor": 1, "amount": "50"}}"#).unwrap();

    let mut cmd2 = Command::new(cargo_bin!("srvana"));
    cmd2.arg("run").arg(second.path()).arg("--db-path").arg(&db_path);

    let output2 = cmd2.output().expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    assert!(stdout2.contains("1,client,150.00,0.00,0.00"));

    // 3. The ledger kept both deposits with fresh ids
    let mut cmd3 = Command::new(cargo_bin!("srvana"));
    cmd3.arg("ledger").arg("--db-path").arg(&db_path);

    let output3 = cmd3.output().expect("Failed to execute command");
    assert!(output3.status.success());
    let ledger = String::from_utf8_lossy(&output3.stdout);
    assert!(ledger.contains("1,DEPOSIT,COMPLETED,1,1,,,100.00,EGP,,"));
    assert!(ledger.contains("2,DEPOSIT,COMPLETED,1,1,,,50.00,EGP,,"));
}

#[test]
fn test_auto_release_sweeps_stored_orders() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut lines = common::accepted_order("200");
    lines.push(
        r#"{"op": "mark_job_done", "actor": 3, "order": 1, "at": "2025-03-02T10:00:00Z"}"#
            .to_string(),
    );
    let file = common::commands_file(&lines);

    let mut run = Command::new(cargo_bin!("srvana"));
    run.arg("run").arg(file.path()).arg("--db-path").arg(&db_path);
    assert!(run.output().expect("Failed to execute command").status.success());

    // Before the 72h window closes nothing moves.
    let mut early = Command::new(cargo_bin!("srvana"));
    early
        .arg("auto-release")
        .arg("--now")
        .arg("2025-03-04T10:00:00Z")
        .arg("--db-path")
        .arg(&db_path);
    let output = early.output().expect("Failed to execute command");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("3,technician,0.00,0.00,0.00"));

    let mut due = Command::new(cargo_bin!("srvana"));
    due.arg("auto-release")
        .arg("--now")
        .arg("2025-03-05T10:00:00Z")
        .arg("--db-path")
        .arg(&db_path);
    let output = due.output().expect("Failed to execute command");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2,client,300.00,0.00,0.00"));
    assert!(stdout.contains("3,technician,0.00,0.00,200.00"));
}
