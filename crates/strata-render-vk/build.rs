use std::{env, fs, path::PathBuf};

// Vertex layout must match `geometry::Vertex`:
//   binding 0, location 0: R32G32B32_SFLOAT (pos)
//   binding 0, location 1: R32G32B32_SFLOAT (color)
// The uniform block must match `strata_render::FrameUniforms`.
const CUBE_VERT: &str = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inColor;

layout(set = 0, binding = 0) uniform Frame { mat4 mvp; } frame;

layout(location = 0) out vec3 vColor;

void main() {
    vColor = inColor;
    gl_Position = frame.mvp * vec4(inPos, 1.0);
}
"#;

const CUBE_FRAG: &str = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0);
}
"#;

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_1 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src, kind, name) in [
        (CUBE_VERT, shaderc::ShaderKind::Vertex, "cube.vert"),
        (CUBE_FRAG, shaderc::ShaderKind::Fragment, "cube.frag"),
    ] {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("compiling {name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
            .unwrap_or_else(|e| panic!("writing {name}.spv: {e}"));
    }

    println!("cargo:rerun-if-changed=build.rs");
}
