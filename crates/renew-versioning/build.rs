//! ---
//! renew_section: "14-versioning"
//! renew_subsection: "build"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Emits git and build metadata for renew-versioning via vergen."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Without `fail_on_error` vergen emits placeholder values when git is unavailable.
    EmitBuilder::builder()
        .all_build()
        .all_cargo()
        .all_git()
        .emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
