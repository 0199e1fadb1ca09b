mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn run(lines: &[String]) -> assert_cmd::assert::Assert {
    let file = common::commands_file(lines);
    let mut cmd = Command::new(cargo_bin!("srvana"));
    cmd.arg("run").arg(file.path());
    cmd.assert().success()
}

fn disputed_order() -> Vec<String> {
    let mut lines = common::accepted_order("200");
    lines.extend([
        r#"{"op": "mark_job_done", "actor": 3, "order": 1}"#.to_string(),
        r#"{"op": "initiate_dispute", "actor": 2, "order": 1, "argument": "Sink still leaks"}"#
            .to_string(),
        r#"{"op": "add_dispute_response", "actor": 3, "dispute": 1, "message": "Fixed as agreed"}"#
            .to_string(),
    ]);
    lines
}

#[test]
fn test_dispute_split_returns_remainder_to_client() {
    let mut lines = disputed_order();
    lines.push(
        r#"{"op": "resolve_dispute", "actor": 1, "dispute": 1, "notes": "Partial fix", "decision": {"resolution": "SPLIT_PAYMENT", "client_refund": "50", "technician_payout": "120"}}"#
            .to_string(),
    );

    // 300 left after escrow, plus the 50 refund and the 30 nobody was assigned.
    run(&lines)
        .stdout(predicate::str::contains("2,client,380.00,0.00,0.00"))
        .stdout(predicate::str::contains("3,technician,0.00,0.00,120.00"));
}

#[test]
fn test_dispute_pay_technician_has_no_commission() {
    let mut lines = disputed_order();
    lines.push(
        r#"{"op": "resolve_dispute", "actor": 1, "dispute": 1, "notes": "Work verified", "decision": {"resolution": "PAY_TECHNICIAN"}}"#
            .to_string(),
    );

    run(&lines)
        .stdout(predicate::str::contains("2,client,300.00,0.00,0.00"))
        .stdout(predicate::str::contains("3,technician,0.00,0.00,200.00"));
}

#[test]
fn test_dispute_freezes_release_until_resolved() {
    let mut lines = disputed_order();
    lines.extend([
        r#"{"op": "release_funds", "actor": 2, "order": 1}"#.to_string(),
        r#"{"op": "resolve_dispute", "actor": 2, "dispute": 1, "notes": "Mine now", "decision": {"resolution": "REFUND_CLIENT"}}"#
            .to_string(),
    ]);

    // Neither the release nor a non-admin resolution touches the escrow.
    run(&lines)
        .stdout(predicate::str::contains("2,client,300.00,200.00,0.00"))
        .stdout(predicate::str::contains("3,technician,0.00,0.00,0.00"));
}

#[test]
fn test_dispute_refund_client() {
    let mut lines = disputed_order();
    lines.push(
        r#"{"op": "resolve_dispute", "actor": 1, "dispute": 1, "notes": "No work done", "decision": {"resolution": "REFUND_CLIENT"}}"#
            .to_string(),
    );

    run(&lines).stdout(predicate::str::contains("2,client,500.00,0.00,0.00"));
}
