fn main() -> Result<(), Box<dyn std::error::Error>> {
    // the Registration server side is used by the fake kubelet in tests
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/api.proto"], &["proto"])?;
    Ok(())
}
