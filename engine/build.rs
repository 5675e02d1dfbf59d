fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protobuf_src::protoc());

    println!("cargo:rerun-if-changed=proto/winproc.proto");
    println!("cargo:rerun-if-changed=proto/reflection.proto");
    println!("cargo:rerun-if-changed=proto");

    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .file_descriptor_set_path(out_dir.join("proto_descriptor.bin"))
        .compile(&["proto/winproc.proto", "proto/reflection.proto"], &["proto"])?;

    Ok(())
}
