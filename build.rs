// Build script to compile GLSL shaders to SPIR-V

use std::path::Path;
use std::process::Command;

const SHADERS: [(&str, &str); 2] = [
    ("shaders/triangle.vert", "shaders/triangle.vert.spv"),
    ("shaders/triangle.frag", "shaders/triangle.frag.spv"),
];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    for (input, output) in SHADERS {
        compile_shader(input, output);
    }
}

fn compile_shader(input: &str, output: &str) {
    let result = Command::new("glslc")
        .arg(Path::new(input))
        .arg("-o")
        .arg(Path::new(output))
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} was not compiled", e, input);
            println!("cargo:warning=Install the Vulkan SDK or run: glslc {} -o {}", input, output);
        }
    }
}
