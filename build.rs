fn main() {
    #[cfg(feature = "ucx")]
    ucx::generate_bindings();
}

#[cfg(feature = "ucx")]
mod ucx {
    use std::env;
    use std::path::PathBuf;
    use std::process::Command;

    pub fn generate_bindings() {
        let include = find_ucx_include();

        println!("cargo:rustc-link-lib=ucp");
        println!("cargo:rustc-link-lib=ucs");
        println!("cargo:rerun-if-env-changed=UCX_DIR");

        let mut builder = bindgen::Builder::default()
            .header_contents("wrapper.h", "#include <ucp/api/ucp.h>\n")
            .allowlist_function("ucp_.*")
            .allowlist_type("ucp_.*")
            .allowlist_var("UCP_.*")
            .allowlist_function("ucs_status_string")
            .allowlist_type("ucs_.*")
            .allowlist_var("UCS_.*")
            .layout_tests(false);

        if let Some(path) = include {
            builder = builder.clang_arg(format!("-I{}", path.display()));
            if let Some(prefix) = path.parent() {
                println!("cargo:rustc-link-search=native={}", prefix.join("lib").display());
            }
        }

        let bindings = builder
            .generate()
            .expect("Unable to generate UCX bindings. Is UCX installed (or UCX_DIR set)?");

        let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
        bindings
            .write_to_file(out.join("ucx_bindings.rs"))
            .expect("Couldn't write UCX bindings");
    }

    fn find_ucx_include() -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Ok(dir) = env::var("UCX_DIR") {
            candidates.push(PathBuf::from(dir).join("include"));
        }
        candidates.extend(
            ["/usr/include", "/usr/local/include", "/opt/ucx/include"]
                .iter()
                .map(PathBuf::from),
        );

        if let Some(path) = candidates
            .into_iter()
            .find(|p| p.join("ucp/api/ucp.h").exists())
        {
            return Some(path);
        }

        let output = Command::new("pkg-config")
            .args(&["--cflags", "ucx"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .find_map(|flag| flag.strip_prefix("-I").map(PathBuf::from))
    }
}
