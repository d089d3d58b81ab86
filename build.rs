// Build script: embeds git/build metadata for the boot banner and panic dumps.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    println!("cargo:rustc-env=GIT_COMMIT={}", git("rev-parse", "HEAD"));
    println!("cargo:rustc-env=GIT_BRANCH={}", git("branch", "--show-current"));
    println!(
        "cargo:rustc-env=PROFILE={}",
        env::var("PROFILE").unwrap_or_else(|_| "unknown".into())
    );
    println!(
        "cargo:rustc-env=TARGET={}",
        env::var("TARGET").unwrap_or_else(|_| "unknown".into())
    );
}

fn git(arg0: &str, arg1: &str) -> String {
    Command::new("git")
        .args([arg0, arg1])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
