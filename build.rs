use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_dir = PathBuf::from("proto");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/");

    // Server stubs only; callers bring their own client.
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(&[proto_dir.join("tollgate/v1/ratelimit.proto")], &[&proto_dir])?;

    Ok(())
}
