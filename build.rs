// Deimos Build Script
// Records build host facts shown by `deimos --version`

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let cpu_cores = num_cpus::get();
    println!("cargo:rustc-env=DEIMOS_BUILD_CPU_CORES={}", cpu_cores);

    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=DEIMOS_TARGET={}", target);

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=DEIMOS_PROFILE={}", profile);
}
