// Build script to compile the line pipeline's GLSL shaders to SPIR-V
//
// Outputs land in OUT_DIR and are embedded by src/backend/shader.rs.
// Without glslc we still produce (empty) outputs so the crate builds; the
// backend then refuses to create its pipeline at runtime.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADERS: &[(&str, &str)] = &[
    ("shaders/lines_xy.vert", "lines_xy.vert.spv"),
    ("shaders/lines_xyz.vert", "lines_xyz.vert.spv"),
    ("shaders/solid_color.frag", "solid_color.frag.spv"),
];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");
    println!("cargo:rerun-if-env-changed=GLSLC");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let glslc = env::var("GLSLC").unwrap_or_else(|_| "glslc".to_string());

    for (input, output) in SHADERS {
        compile_shader(&glslc, Path::new(input), &out_dir.join(output));
    }
}

fn compile_shader(glslc: &str, input: &Path, output: &Path) {
    let result = Command::new(glslc)
        .arg("--target-env=vulkan1.2")
        .arg(input)
        .arg("-o")
        .arg(output)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input.display(), status.code());
        }
        Err(e) => {
            println!(
                "cargo:warning=glslc not found ({}); {} embedded as an empty blob",
                e,
                input.display()
            );
            fs::write(output, []).expect("Failed to write placeholder shader blob");
        }
    }
}
