//! Shader compilation for the Vitric toolkit.
//!
//! Compiles GLSL source to SPIR-V at runtime using shaderc, and persists the
//! resulting artifacts as raw little-endian 32-bit words.

use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("shader compiler is unavailable: {0}")]
    CompilerUnavailable(String),
    #[error("shader compilation failed: {0}")]
    Compilation(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed SPIR-V: {0}")]
    MalformedSpirv(String),
}

pub type Result<T> = std::result::Result<T, ShaderError>;

/// Compiled compute shader.
#[derive(Debug, Clone)]
pub struct ComputeArtifact {
    pub comp_spv: Vec<u32>,
}

/// Compiled vertex/fragment shader pair.
#[derive(Debug, Clone)]
pub struct GraphicsArtifact {
    pub vert_spv: Vec<u32>,
    pub frag_spv: Vec<u32>,
}

static COMPILER: OnceLock<shaderc::Compiler> = OnceLock::new();

fn compiler() -> Result<&'static shaderc::Compiler> {
    if let Some(compiler) = COMPILER.get() {
        return Ok(compiler);
    }
    let compiler = shaderc::Compiler::new().ok_or_else(|| {
        ShaderError::CompilerUnavailable("failed to initialize shaderc".to_string())
    })?;
    Ok(COMPILER.get_or_init(|| compiler))
}

fn compile(
    source: &str,
    kind: shaderc::ShaderKind,
    file_name: &str,
    entry: &str,
) -> Result<Vec<u32>> {
    let mut options = shaderc::CompileOptions::new().ok_or_else(|| {
        ShaderError::CompilerUnavailable("failed to create compile options".to_string())
    })?;
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    let artifact = compiler()?
        .compile_into_spirv(source, kind, file_name, entry, Some(&options))
        .map_err(|e| ShaderError::Compilation(e.to_string()))?;
    if artifact.get_num_warnings() > 0 {
        tracing::warn!("{}", artifact.get_warning_messages());
    }
    Ok(artifact.as_binary().to_vec())
}

/// Compile a compute shader.
pub fn compile_comp(source: &str, entry: &str) -> Result<ComputeArtifact> {
    let comp_spv = compile(source, shaderc::ShaderKind::Compute, "comp", entry)?;
    Ok(ComputeArtifact { comp_spv })
}

/// Compile a vertex/fragment shader pair.
pub fn compile_graph(
    vert_source: &str,
    vert_entry: &str,
    frag_source: &str,
    frag_entry: &str,
) -> Result<GraphicsArtifact> {
    let vert_spv = compile(vert_source, shaderc::ShaderKind::Vertex, "vert", vert_entry)?;
    let frag_spv = compile(frag_source, shaderc::ShaderKind::Fragment, "frag", frag_entry)?;
    Ok(GraphicsArtifact { vert_spv, frag_spv })
}

fn save_spv(path: &Path, spv: &[u32]) -> Result<()> {
    std::fs::write(path, bytemuck::cast_slice::<u32, u8>(spv))?;
    tracing::debug!("saved {}", path.display());
    Ok(())
}

fn load_spv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(ShaderError::MalformedSpirv(format!(
            "{} is not a whole number of words",
            path.display()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

impl ComputeArtifact {
    /// Write `<prefix>.comp.spv`.
    pub fn save(&self, prefix: &str) -> Result<()> {
        save_spv(Path::new(&format!("{prefix}.comp.spv")), &self.comp_spv)
    }

    /// Read `<prefix>.comp.spv`.
    pub fn load(prefix: &str) -> Result<Self> {
        Ok(Self {
            comp_spv: load_spv(Path::new(&format!("{prefix}.comp.spv")))?,
        })
    }
}

impl GraphicsArtifact {
    /// Write `<prefix>.vert.spv` and `<prefix>.frag.spv`.
    pub fn save(&self, prefix: &str) -> Result<()> {
        save_spv(Path::new(&format!("{prefix}.vert.spv")), &self.vert_spv)?;
        save_spv(Path::new(&format!("{prefix}.frag.spv")), &self.frag_spv)
    }

    /// Read `<prefix>.vert.spv` and `<prefix>.frag.spv`.
    pub fn load(prefix: &str) -> Result<Self> {
        Ok(Self {
            vert_spv: load_spv(Path::new(&format!("{prefix}.vert.spv")))?,
            frag_spv: load_spv(Path::new(&format!("{prefix}.frag.spv")))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY_COMP: &str = r#"
        #version 460 core
        layout(local_size_x = 1) in;
        void main() {}
    "#;

    #[test]
    fn compute_shader_compiles() {
        let artifact = compile_comp(IDENTITY_COMP, "main").unwrap();
        // SPIR-V magic number.
        assert_eq!(artifact.comp_spv[0], 0x0723_0203);
        assert!(artifact.comp_spv.len() > 5);
    }

    #[test]
    fn broken_shader_reports_compilation_error() {
        let err = compile_comp("#version 460 core\nvoid main() { nonsense; }", "main")
            .unwrap_err();
        assert!(matches!(err, ShaderError::Compilation(_)));
    }

    #[test]
    fn artifact_round_trips_through_disk() {
        let artifact = compile_comp(IDENTITY_COMP, "main").unwrap();
        let dir = std::env::temp_dir().join("vitric-shaders-test");
        std::fs::create_dir_all(&dir).unwrap();
        let prefix = dir.join("identity");
        let prefix = prefix.to_str().unwrap();

        artifact.save(prefix).unwrap();
        let loaded = ComputeArtifact::load(prefix).unwrap();
        assert_eq!(artifact.comp_spv, loaded.comp_spv);
    }
}
