// Shader loading and the SPIR-V cache
//
// Shader sources live under resources/shaders and are compiled on
// demand with shaderc. Compiled binaries are written into the cache
// directory next to them; a shader is recompiled only when its
// source is newer than the cached binary. The resource directory is
// found by walking up from the working directory, so the renderer
// runs from any build subdirectory.

use crate::{AuroraError, Result};
use std::fs;
use std::path::{Path, PathBuf};

use utils::log;

lazy_static::lazy_static! {
    static ref RESOURCE_DIRECTORY: PathBuf = find_resource_directory()
        .expect("No resource directory found in any parent of the working directory");
}

/// Walk upward from the current working directory until a child
/// directory named `resources` exists.
fn find_resource_directory() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;
    loop {
        let candidate = current.join("resources");
        if candidate.is_dir() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

pub fn resource_directory() -> &'static Path {
    &RESOURCE_DIRECTORY
}

pub fn shader_directory() -> PathBuf {
    resource_directory().join("shaders")
}

pub fn shader_cache_directory() -> PathBuf {
    shader_directory().join("cache")
}

pub fn absolute_shader_path_from_relative(relative: &Path) -> PathBuf {
    shader_directory().join(relative)
}

pub fn shader_cache_path_from_relative(relative: &Path) -> PathBuf {
    let mut path = shader_cache_directory().join(relative);
    let mut file_name = path.file_name().unwrap_or_default().to_os_string();
    file_name.push(".spv");
    path.set_file_name(file_name);
    path
}

/// Compare source and cache modification times.
/// A missing cache file counts as out of date.
pub fn is_shader_out_of_date(relative: &Path) -> bool {
    let src_path = absolute_shader_path_from_relative(relative);
    let cache_path = shader_cache_path_from_relative(relative);

    let src_time = match fs::metadata(&src_path).and_then(|m| m.modified()) {
        Ok(time) => time,
        Err(_) => return false, // missing source, nothing to recompile from
    };
    let cache_time = match fs::metadata(&cache_path).and_then(|m| m.modified()) {
        Ok(time) => time,
        Err(_) => return true,
    };
    src_time > cache_time
}

fn shader_kind_from_extension(path: &Path) -> Result<shaderc::ShaderKind> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or(AuroraError::SHADER_COMPILE_FAILED)?;
    match extension {
        "vert" => Ok(shaderc::ShaderKind::Vertex),
        "frag" => Ok(shaderc::ShaderKind::Fragment),
        "geom" => Ok(shaderc::ShaderKind::Geometry),
        "tesc" => Ok(shaderc::ShaderKind::TessControl),
        "tese" => Ok(shaderc::ShaderKind::TessEvaluation),
        "comp" => Ok(shaderc::ShaderKind::Compute),
        _ => {
            log::error!("Unknown shader extension: {}", extension);
            Err(AuroraError::SHADER_COMPILE_FAILED)
        }
    }
}

fn compile_shader(relative: &Path) -> Result<Vec<u32>> {
    let src_path = absolute_shader_path_from_relative(relative);
    let source = fs::read_to_string(&src_path).map_err(|e| {
        log::error!("Could not read shader source {:?}: {}", src_path, e);
        AuroraError::SHADER_COMPILE_FAILED
    })?;

    let kind = shader_kind_from_extension(relative)?;

    let compiler = shaderc::Compiler::new().ok_or(AuroraError::SHADER_COMPILE_FAILED)?;
    let mut options =
        shaderc::CompileOptions::new().ok_or(AuroraError::SHADER_COMPILE_FAILED)?;
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_2 as u32,
    );
    options.set_optimization_level(shaderc::OptimizationLevel::Performance);
    // resolve #include against the shader directory
    options.set_include_callback(|name, _include_type, _source, _depth| {
        let full_path = shader_directory().join(name);
        match fs::read_to_string(&full_path) {
            Ok(content) => Ok(shaderc::ResolvedInclude {
                resolved_name: full_path.to_string_lossy().to_string(),
                content: content,
            }),
            Err(e) => Err(format!("could not open include {:?}: {}", full_path, e)),
        }
    });

    let artifact = compiler
        .compile_into_spirv(
            &source,
            kind,
            &src_path.to_string_lossy(),
            "main",
            Some(&options),
        )
        .map_err(|e| {
            log::error!("Shader compilation failed:\n{}", e);
            AuroraError::SHADER_COMPILE_FAILED
        })?;

    if artifact.get_num_warnings() > 0 {
        log::error!(
            "Shader compile warnings for {:?}:\n{}",
            relative,
            artifact.get_warning_messages()
        );
    }

    Ok(artifact.as_binary().to_vec())
}

fn load_spirv_file(path: &Path) -> Result<Vec<u32>> {
    let mut file = fs::File::open(path).or(Err(AuroraError::SHADER_COMPILE_FAILED))?;
    ash::util::read_spv(&mut file).or(Err(AuroraError::SHADER_COMPILE_FAILED))
}

fn write_spirv_file(spirv: &[u32], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).or(Err(AuroraError::SHADER_COMPILE_FAILED))?;
    }
    let mut bytes = Vec::with_capacity(spirv.len() * 4);
    for word in spirv {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    fs::write(path, bytes).or(Err(AuroraError::SHADER_COMPILE_FAILED))
}

/// The whole loading process: returns up to date SPIR-V for a
/// source path relative to resources/shaders, recompiling and
/// refreshing the cache only when the source is newer.
pub fn load_shader(relative: &Path) -> Result<Vec<u32>> {
    let cache_path = shader_cache_path_from_relative(relative);

    if !is_shader_out_of_date(relative) && cache_path.exists() {
        if let Ok(spirv) = load_spirv_file(&cache_path) {
            return Ok(spirv);
        }
        // cache unreadable, fall through to a fresh compile
    }

    log::info!("Compiling shader {:?}", relative);
    let spirv = compile_shader(relative)?;
    write_spirv_file(&spirv, &cache_path)?;
    Ok(spirv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_appends_spv() {
        let cache = shader_cache_path_from_relative(Path::new("sdf/trace.comp"));
        assert!(cache.ends_with("cache/sdf/trace.comp.spv"));
    }

    #[test]
    fn shader_kinds() {
        assert!(shader_kind_from_extension(Path::new("a.vert")).is_ok());
        assert!(shader_kind_from_extension(Path::new("a.comp")).is_ok());
        assert!(shader_kind_from_extension(Path::new("a.txt")).is_err());
    }
}
