/// Generates the gRPC client and server bindings for `proto/leafid.proto`.
///
/// The encoded file descriptor set is written next to the generated code as
/// `leafid_descriptor.bin` so the server can expose it through gRPC
/// reflection.
///
/// Generated code is included via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("leafid");
/// }
/// ```
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("leafid_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/leafid.proto"], &["proto"])
        .unwrap();

    println!("cargo:rerun-if-changed=proto/leafid.proto");
}
