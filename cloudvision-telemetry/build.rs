fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The server side backs the in-process gNMI target used by the tests.
    tonic_build::configure()
        .build_server(true)
        .compile_protos(&["proto/gnmi.proto"], &["proto/", "/usr/include"])?;
    Ok(())
}
