use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = PathBuf::from("../proto");

    println!("cargo:rerun-if-changed=../proto/repoauth/v1/");

    // Clients are built in service-core.
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .file_descriptor_set_path(
            PathBuf::from(std::env::var("OUT_DIR")?).join("repoauth_descriptor.bin"),
        )
        .compile_protos(&["../proto/repoauth/v1/auth.proto"], &[proto_root])?;

    Ok(())
}
