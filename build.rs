// build.rs - Build metadata for bacnet-events
//
// Exposes build timestamp, compiler version, target and profile to the crate
// through rustc environment variables read in src/lib.rs.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=build.rs");

    set_build_env_vars();
}

/// Set build environment variables that the code expects
fn set_build_env_vars() {
    println!(
        "cargo:rustc-env=BACNET_EVENTS_BUILD_TIMESTAMP={}",
        chrono::Utc::now().to_rfc3339()
    );

    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let rustc_version = Command::new(rustc)
        .arg("--version")
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=BACNET_EVENTS_RUSTC_VERSION={}", rustc_version);

    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=BACNET_EVENTS_TARGET={}", target);

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=BACNET_EVENTS_PROFILE={}", profile);

    // Optionally set git hash if in a git repository
    let git_hash = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string());
    if let Some(hash) = git_hash {
        println!("cargo:rustc-env=BACNET_EVENTS_GIT_HASH={}", hash);
    }
}
