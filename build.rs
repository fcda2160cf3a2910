fn main() -> Result<(), std::io::Error> {
    prost_build::compile_protos(&["src/protos/ordering/v1/store.proto"], &["src/protos/"])?;
    Ok(())
}
