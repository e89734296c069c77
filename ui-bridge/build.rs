use std::{env, process::Command};

fn main() {
    println!("cargo:rerun-if-env-changed=UI_BRIDGE_BUILD_VERSION");

    let version = env::var("UI_BRIDGE_BUILD_VERSION").unwrap_or_else(|_| {
        run_git(["describe", "--tags", "--always", "--dirty"])
            .unwrap_or_else(|| env::var("CARGO_PKG_VERSION").unwrap_or_default())
    });

    println!("cargo:rustc-env=UI_BRIDGE_BUILD_VERSION={version}");
}

fn run_git<const N: usize>(args: [&str; N]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
