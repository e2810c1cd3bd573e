//! Build script for spdk-dif-sys
//!
//! Finds SPDK through pkg-config, links the env layer and the NVMe driver
//! statically and generates bindings for them with bindgen.
//!
//! Environment variables:
//! - `PKG_CONFIG_PATH`: Must include SPDK's pkg-config directory (e.g., /opt/spdk/lib/pkgconfig)

use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

/// pkg-config modules for the pieces of SPDK the bindings cover. `libdpdk`
/// contributes the DPDK archives behind `spdk_env_dpdk`.
const SPDK_MODULES: &[&str] = &["spdk_env_dpdk", "spdk_nvme", "spdk_log", "spdk_util", "libdpdk"];

/// Libraries that SPDK's `Libs.private` names but which come from the
/// system and are linked dynamically.
const SYSTEM_LIBS: &[&str] = &[
    "crypto", "ssl", "numa", "uuid", "aio", "dl", "m", "rt", "pthread", "uring", "isal",
    "isal_crypto", "keyutils", "ibverbs", "rdmacm", "mlx5",
];

/// System packages the NVMe driver needs that SPDK's `.pc` files omit, with
/// the library to fall back to when the package has no `.pc` file.
const EXTRA_PACKAGES: &[(&str, &str)] = &[
    ("libssl", "ssl"),
    ("libcrypto", "crypto"),
    ("libisal", "isal"),
    ("libisal_crypto", "isal_crypto"),
    ("uuid", "uuid"),
];

#[derive(Default)]
struct Linkage {
    include_paths: Vec<PathBuf>,
    search_paths: BTreeSet<PathBuf>,
    archives: BTreeSet<String>,
    system: BTreeSet<String>,
}

fn probe_spdk() -> Linkage {
    let mut linkage = Linkage::default();

    for module in SPDK_MODULES {
        let library = pkg_config::Config::new()
            .statik(true)
            .env_metadata(true)
            .probe(module)
            .unwrap_or_else(|e| {
                panic!(
                    "Failed to find {}: {}. Set PKG_CONFIG_PATH to include SPDK's pkg-config directory.",
                    module, e
                )
            });

        for path in library.include_paths {
            if !linkage.include_paths.contains(&path) {
                linkage.include_paths.push(path);
            }
        }
        linkage.search_paths.extend(library.link_paths);
        for name in library.libs {
            // `:librte_foo.a` repeats a library already listed by name
            if name.starts_with(':') || name.ends_with(".a") {
                continue;
            }
            if SYSTEM_LIBS.contains(&name.as_str()) {
                linkage.system.insert(name);
            } else {
                linkage.archives.insert(name);
            }
        }
    }

    for (package, lib) in EXTRA_PACKAGES {
        if pkg_config::Config::new().statik(true).probe(package).is_err() {
            linkage.system.insert(lib.to_string());
        }
    }
    // No .pc file for libaio
    linkage.system.insert("aio".to_string());

    linkage
}

fn emit_links(linkage: &Linkage) {
    for path in &linkage.search_paths {
        println!("cargo:rustc-link-search=native={}", path.display());
    }

    // Driver and transport tables are registered from static constructors,
    // which the linker drops unless the whole archive is kept
    println!("cargo:rustc-link-arg=-Wl,--whole-archive");
    for lib in &linkage.archives {
        println!("cargo:rustc-link-lib=static={}", lib);
    }
    println!("cargo:rustc-link-arg=-Wl,--no-whole-archive");

    for lib in &linkage.system {
        println!("cargo:rustc-link-lib={}", lib);
    }
}

fn generate_bindings(include_paths: &[PathBuf]) {
    let clang_args: Vec<String> = include_paths
        .iter()
        .map(|p| format!("-I{}", p.display()))
        .collect();

    let bindings = bindgen::Builder::default()
        .header("wrapper.h")
        .clang_args(&clang_args)
        .allowlist_function("spdk_env_.*")
        .allowlist_function("spdk_dma_.*")
        .allowlist_function("spdk_nvme_.*")
        .allowlist_type("spdk_nvme_.*")
        .allowlist_type("spdk_env_opts")
        .allowlist_var("SPDK_NVME_.*")
        .derive_default(true)
        .derive_debug(true)
        .derive_copy(true)
        .wrap_unsafe_ops(true)
        // Only ever handled through pointers
        .opaque_type("spdk_nvme_ctrlr")
        .opaque_type("spdk_nvme_ns")
        .opaque_type("spdk_nvme_qpair")
        // Identify data is read as raw bytes; packed structs with aligned
        // fields also trip E0588
        .opaque_type("spdk_nvme_ctrlr_data")
        .opaque_type("spdk_nvme_ns_data")
        .opaque_type("spdk_nvme_tcp_cmd")
        .opaque_type("spdk_nvme_tcp_rsp")
        .layout_tests(false)
        .generate()
        .expect("Failed to generate SPDK bindings");

    let out_path = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    bindings
        .write_to_file(out_path.join("bindings.rs"))
        .expect("Failed to write bindings");
}

fn main() {
    println!("cargo:rerun-if-changed=wrapper.h");
    println!("cargo:rerun-if-env-changed=PKG_CONFIG_PATH");

    let linkage = probe_spdk();
    emit_links(&linkage);
    generate_bindings(&linkage.include_paths);
}
