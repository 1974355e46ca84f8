use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only cargo metadata is emitted.  Git metadata isn't available when the crate is built from
    // a published package, and the build shouldn't fail because of that
    EmitBuilder::builder().all_cargo().emit()?;

    Ok(())
}
