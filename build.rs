// SPDX-License-Identifier: Apache-2.0

// build.rs for buc
use sha2::{Digest, Sha256};
use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;

fn find_nvcc() -> Option<String> {
    let nvcc_candidates = [
        "nvcc",
        "/usr/local/cuda/bin/nvcc",
        "/opt/cuda/bin/nvcc",
        "/usr/bin/nvcc",
    ];

    if let Ok(cuda_home) = env::var("CUDA_HOME") {
        let cuda_nvcc = format!("{}/bin/nvcc", cuda_home);
        if Command::new(&cuda_nvcc).arg("--version").output().is_ok() {
            return Some(cuda_nvcc);
        }
    }

    for nvcc in &nvcc_candidates {
        if Command::new(nvcc).arg("--version").output().is_ok() {
            return Some(nvcc.to_string());
        }
    }

    None
}

fn detect_gpu_arch() -> String {
    if let Ok(output) = Command::new("nvidia-smi")
        .args(["--query-gpu=compute_cap", "--format=csv,noheader,nounits"])
        .output()
    {
        let cap_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
        // One line per GPU; device 0 is the one the engine binds to
        if let Some(first) = cap_str.lines().next() {
            if let Some((major, minor)) = first.trim().split_once('.') {
                return format!("sm_{}{}", major, minor);
            }
        }
    }
    "sm_70".to_string()
}

/// Compiles the CUDA wrapper into `libbuc_cuda.so`, skipping the work when the source
/// hash matches the last successful build. Returns whether the library is usable.
fn build_cuda_wrapper(nvcc: &str, out_dir: &str) -> bool {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let cuda_source = format!("{}/src/cuda_wrapper.cu", manifest_dir);
    let cuda_output = format!("{}/libbuc_cuda.so", out_dir);
    let hash_file = format!("{}/cuda_wrapper.hash", out_dir);

    let Ok(bytes) = fs::read(&cuda_source) else {
        println!("cargo:warning=buc: {} missing, CUDA backend disabled", cuda_source);
        return false;
    };

    let hash = format!("{:x}", Sha256::digest(&bytes));
    let prev_hash = fs::read_to_string(&hash_file).unwrap_or_default();
    if hash == prev_hash && Path::new(&cuda_output).exists() {
        return true;
    }

    let gpu_arch = detect_gpu_arch();
    let output = Command::new(nvcc)
        .args([
            "-shared",
            "-o",
            &cuda_output,
            &cuda_source,
            "-lcudart",
            "-O3",
            "-std=c++17",
            &format!("-arch={}", gpu_arch),
            "-Xcompiler",
            "-fPIC",
        ])
        .output();

    match output {
        Ok(output) if output.status.success() => {
            fs::write(&hash_file, hash).ok();
            true
        }
        Ok(output) => {
            println!(
                "cargo:warning=buc: nvcc failed, CUDA backend disabled: {}",
                String::from_utf8_lossy(&output.stderr)
                    .lines()
                    .next()
                    .unwrap_or("")
            );
            false
        }
        Err(e) => {
            println!("cargo:warning=buc: could not run nvcc ({}), CUDA backend disabled", e);
            false
        }
    }
}

fn main() {
    println!("cargo:rustc-check-cfg=cfg(has_cuda)");
    println!("cargo:rerun-if-changed=src/cuda_wrapper.cu");
    println!("cargo:rerun-if-env-changed=CUDA_HOME");
    println!("cargo:rerun-if-env-changed=CUDA_PATH");

    let Some(nvcc) = find_nvcc() else {
        return;
    };

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    if !build_cuda_wrapper(&nvcc, &out_dir) {
        return;
    }

    println!("cargo:rustc-cfg=has_cuda");
    let cuda_home = env::var("CUDA_HOME")
        .or_else(|_| env::var("CUDA_PATH"))
        .unwrap_or_else(|_| "/usr/local/cuda".to_string());

    let driver_candidates = [
        "/usr/lib/x86_64-linux-gnu",
        "/usr/lib64",
        "/usr/local/nvidia/lib64",
        "/usr/lib/wsl/lib",
    ];

    for dir in &driver_candidates {
        let p = Path::new(dir);
        if p.join("libcuda.so.1").exists() {
            println!("cargo:rustc-link-search=native={}", p.display());
            println!("cargo:rustc-link-arg=-Wl,-rpath,{}", p.display());
        }
    }

    let cuda_lib64 = Path::new(&cuda_home).join("lib64");
    if cuda_lib64.exists() {
        println!("cargo:rustc-link-search=native={}", cuda_lib64.display());
        println!("cargo:rustc-link-arg=-Wl,-rpath,{}", cuda_lib64.display());
    }

    println!("cargo:rustc-link-search=native={}", out_dir);
    println!("cargo:rustc-link-lib=dylib=buc_cuda");
    println!("cargo:rustc-link-arg=-Wl,-rpath,{}", out_dir);
    println!("cargo:rustc-link-lib=dylib=cudart");
    println!("cargo:rustc-link-lib=dylib=cuda");
    println!("cargo:rustc-link-lib=dylib=stdc++");
}
