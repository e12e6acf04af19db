//! Integration Test: Workspace Architecture Rules
//!
//! **Policy**: Production code must not sleep. Timed protocol work is queued
//! on the engine and waited on with `sleep_until` of the next deadline.
//! **Policy**: `voicelink-core` stays synchronous. The daemon owns the runtime.

use std::path::{Path, PathBuf};

use architectural_enforcement::{scan_directory, Rule, SleepPolicy, Violation};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

fn report(kind: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ CRITICAL: {kind} found in production code!\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }

    panic!(
        "\nFound {} {kind} violation(s).\nFix these before merging!",
        violations.len()
    );
}

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let root = workspace_root();
    let policy = Rule::NoSleep(SleepPolicy {
        allow_backoff: true,
        allow_tests: true,
    });

    let mut violations = scan_directory(&root.join("voicelink/core/src"), policy);
    violations.extend(scan_directory(&root.join("voicelink/daemon/src"), policy));

    if !violations.is_empty() {
        eprintln!("\n✅ ACCEPTABLE waits:");
        eprintln!("  - tokio::time::sleep_until(engine.next_deadline())");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("  - Exponential backoff in retry logic");
    }
    report("sleep call", &violations);
}

/// Test that the protocol engine never grows its own async runtime use
#[test]
fn test_core_is_synchronous() {
    let violations = scan_directory(
        &workspace_root().join("voicelink/core/src"),
        Rule::Synchronous,
    );
    report("async code", &violations);
}

/// Guard against the scanned directories moving out from under the rules
#[test]
fn test_scanned_directories_exist() {
    let root = workspace_root();
    for dir in ["voicelink/core/src", "voicelink/daemon/src"] {
        assert!(root.join(dir).is_dir(), "{dir} is missing");
    }
}
