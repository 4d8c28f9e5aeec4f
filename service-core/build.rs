use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = PathBuf::from("../proto");

    println!("cargo:rerun-if-changed=../proto/repoauth/v1/");

    // Client stubs only; the server lives in repoauth-service.
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(&["../proto/repoauth/v1/auth.proto"], &[&proto_root])?;

    Ok(())
}
