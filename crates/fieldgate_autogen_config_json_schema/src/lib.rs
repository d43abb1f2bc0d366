//! Writes the JSON Schema of the Fieldgate configuration file to
//! `schema.json` at build time. See `build.rs`.
