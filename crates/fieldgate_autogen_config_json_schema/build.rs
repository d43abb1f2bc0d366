use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

use fieldgate_lib::config::Config;
use schemars::schema_for;

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed=../fieldgate_lib/src/config.rs");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").map_err(io::Error::other)?);
    let schema = schema_for!(Config);
    let json = serde_json::to_string_pretty(&schema).map_err(io::Error::other)?;
    fs::write(manifest_dir.join("schema.json"), json)
}
