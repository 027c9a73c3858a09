// ---
// kdm_section: "01-core-functionality"
// kdm_subsection: "build-script"
// kdm_type: "source"
// kdm_scope: "build"
// kdm_description: "Build metadata capture for version reporting."
// kdm_version: "v0.1.0"
// kdm_owner: "tbd"
// ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Missing git metadata (e.g. source tarball builds) falls back to
    // VERGEN defaults instead of failing the build.
    EmitBuilder::builder().all_cargo().all_git().emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
