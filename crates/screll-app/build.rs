// SPDX-License-Identifier: CEPL-1.0
fn main() {
    println!("cargo:rerun-if-changed=shaders");
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(feature = "compile-shaders")]
    shaders::compile();
}

#[cfg(feature = "compile-shaders")]
mod shaders {
    use std::{env, fs, path::PathBuf};

    const STAGES: [(&str, shaderc::ShaderKind); 2] = [
        ("triangle.vert", shaderc::ShaderKind::Vertex),
        ("triangle.frag", shaderc::ShaderKind::Fragment),
    ];

    pub fn compile() {
        let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
        let src_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR")).join("shaders");

        let comp = shaderc::Compiler::new().expect("shaderc compiler");
        let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
        opts.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_0 as u32);
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        for (name, kind) in STAGES {
            let path = src_dir.join(name);
            let source = fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()));
            let spv = comp
                .compile_into_spirv(&source, kind, name, "main", Some(&opts))
                .unwrap_or_else(|e| panic!("{name}: {e}"));
            fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).expect("write SPIR-V");
        }

        println!("cargo:rustc-env=SCRELL_SHADER_DIR={}", out.display());
    }
}
