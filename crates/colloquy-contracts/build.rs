use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

struct EmbeddedSchema {
    reference: String,
    sha256: String,
    body: String,
}

fn main() {
    let manifest_dir =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let repo_root = manifest_dir
        .ancestors()
        .nth(2)
        .expect("workspace root")
        .to_path_buf();
    let contracts_dir = repo_root.join("contracts/v1");
    let openapi_path = repo_root.join("openapi/v1.yaml");

    println!("cargo:rerun-if-changed={}", contracts_dir.display());
    println!("cargo:rerun-if-changed={}", openapi_path.display());

    let schemas = collect_schemas(&repo_root, &contracts_dir);

    let mut set_hasher = Sha256::new();
    for schema in &schemas {
        set_hasher.update(schema.reference.as_bytes());
        set_hasher.update([0]);
        set_hasher.update(schema.body.as_bytes());
        set_hasher.update([0]);
    }
    let contracts_set_sha = hex(&set_hasher.finalize());

    let openapi_bytes = fs::read(&openapi_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", openapi_path.display()));
    let openapi_sha = hex(&Sha256::digest(&openapi_bytes));
    let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut out = String::new();
    out.push_str(&format!(
        "pub const GENERATED_OPENAPI_SHA256: &str = {openapi_sha:?};\n"
    ));
    out.push_str(&format!(
        "pub const GENERATED_CONTRACTS_SET_SHA256: &str = {contracts_set_sha:?};\n"
    ));
    out.push_str(&format!(
        "pub const GENERATED_AT_RFC3339: &str = {generated_at:?};\n"
    ));
    out.push_str("pub const GENERATED_CONTRACT_SCHEMAS: &[(&str, &str, &str)] = &[\n");
    for schema in schemas {
        out.push_str(&format!(
            "    ({:?}, {:?}, {:?}),\n",
            schema.reference, schema.sha256, schema.body
        ));
    }
    out.push_str("];\n");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR"));
    fs::write(out_dir.join("generated_contracts.rs"), out).expect("write generated_contracts.rs");
}

fn collect_schemas(repo_root: &Path, dir: &Path) -> Vec<EmbeddedSchema> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", dir.display()))
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(".schema.json"))
        })
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            println!("cargo:rerun-if-changed={}", path.display());
            let bytes = fs::read(&path)
                .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));
            let sha256 = hex(&Sha256::digest(&bytes));
            let body = String::from_utf8(bytes)
                .unwrap_or_else(|e| panic!("schema is not utf-8 {}: {e}", path.display()));
            let rel = path
                .strip_prefix(repo_root)
                .unwrap_or_else(|e| panic!("{} outside workspace: {e}", path.display()));
            EmbeddedSchema {
                reference: format!("../{}", rel.to_string_lossy().replace('\\', "/")),
                sha256,
                body,
            }
        })
        .collect()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
