fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protobuf_src::protoc());

    println!("cargo:rerun-if-changed=../engine/proto/winproc.proto");

    tonic_build::configure()
        .build_client(true)
        .build_server(false)
        .compile(&["../engine/proto/winproc.proto"], &["../engine/proto"])?;

    Ok(())
}
