// Build script to compile GLSL shaders to SPIR-V
//
// Any `*.vert` / `*.frag` file under shaders/ is compiled next to itself as
// `<name>.spv`. The engine itself only ever reads the .spv files named in
// config.toml, so a missing shaders/ directory is not an error.

use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let Ok(entries) = std::fs::read_dir("shaders") else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_glsl = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("vert") | Some("frag")
        );
        if is_glsl {
            let output = format!("{}.spv", path.display());
            compile_shader(&path, Path::new(&output));
        }
    }
}

fn compile_shader(input: &Path, output: &Path) {
    // glslc ships with the Vulkan SDK
    let result = Command::new("glslc").arg(input).arg("-o").arg(output).status();

    match result {
        Ok(status) if status.success() => {
            println!("cargo:rerun-if-changed={}", input.display());
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input.display(), status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), skipping {}", e, input.display());
        }
    }
}
