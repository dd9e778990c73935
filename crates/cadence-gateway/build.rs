use std::process::Command;

/// Exposes `CADENCE_GIT_SHA` to the gateway for `/health`.
///
/// Container builds usually have no `.git`; they pass the revision in
/// through the same variable instead.
fn main() {
    println!("cargo:rerun-if-env-changed=CADENCE_GIT_SHA");
    println!("cargo:rerun-if-changed=../../.git/HEAD");

    let revision = std::env::var("CADENCE_GIT_SHA")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(describe_head)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=CADENCE_GIT_SHA={revision}");
}

fn describe_head() -> Option<String> {
    let out = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
}
