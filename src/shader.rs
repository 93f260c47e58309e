//! Precompiled shader artifacts.
//!
//! Shaders are compiled ahead of time by an external compiler. A renderable
//! names a shader by its base path and each backend appends its own bytecode
//! suffix before the file is read.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{DriverError, DriverResult};

/// SPIR-V bytecode suffix.
pub const SPIRV_SUFFIX: &str = ".spv";

/// Compiled HLSL object suffix.
pub const CSO_SUFFIX: &str = ".cso";

/// Entry point every stage is compiled with.
pub const ENTRY_POINT: &str = "main";

/// Programmable pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    TessellationControl,
    TessellationEvaluation,
}

/// Optional stages the device can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSupport {
    pub geometry: bool,
    pub tessellation: bool,
}

impl StageSupport {
    pub const ALL: Self = Self {
        geometry: true,
        tessellation: true,
    };

    pub fn supports(&self, stage: ShaderStage) -> bool {
        match stage {
            ShaderStage::Vertex | ShaderStage::Fragment => true,
            ShaderStage::Geometry => self.geometry,
            ShaderStage::TessellationControl | ShaderStage::TessellationEvaluation => {
                self.tessellation
            }
        }
    }

    pub fn check(&self, stage: ShaderStage) -> DriverResult<()> {
        if !self.supports(stage) {
            return Err(DriverError::CapabilityUnsupported(format!(
                "{:?} shaders are not supported by the device",
                stage
            )));
        }
        Ok(())
    }
}

impl Default for StageSupport {
    fn default() -> Self {
        Self::ALL
    }
}

/// Append `suffix` to `path` unless it already ends with it.
///
/// `shaders/triangle.vert` becomes `shaders/triangle.vert.spv`.
pub fn resolve_shader_path(path: &Path, suffix: &str) -> PathBuf {
    if path.as_os_str().to_string_lossy().ends_with(suffix) {
        return path.to_path_buf();
    }
    let mut resolved = OsString::from(path.as_os_str());
    resolved.push(suffix);
    PathBuf::from(resolved)
}

/// Read a whole file into memory.
pub fn read_file(path: &Path) -> DriverResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| DriverError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolve_appends_suffix() {
        assert_eq!(
            resolve_shader_path(Path::new("shaders/triangle.vert"), SPIRV_SUFFIX),
            PathBuf::from("shaders/triangle.vert.spv")
        );
        assert_eq!(
            resolve_shader_path(Path::new("shaders/triangle_vs"), CSO_SUFFIX),
            PathBuf::from("shaders/triangle_vs.cso")
        );
    }

    #[test]
    fn test_resolve_keeps_existing_suffix() {
        assert_eq!(
            resolve_shader_path(Path::new("a/b.frag.spv"), SPIRV_SUFFIX),
            PathBuf::from("a/b.frag.spv")
        );
    }

    #[test]
    fn test_stage_support() {
        let vertex_only = StageSupport {
            geometry: false,
            tessellation: false,
        };
        assert!(vertex_only.check(ShaderStage::Vertex).is_ok());
        assert!(vertex_only.check(ShaderStage::Fragment).is_ok());
        assert!(matches!(
            vertex_only.check(ShaderStage::Geometry),
            Err(DriverError::CapabilityUnsupported(_))
        ));
        assert!(vertex_only.check(ShaderStage::TessellationEvaluation).is_err());
        assert!(StageSupport::ALL.check(ShaderStage::TessellationControl).is_ok());
    }

    #[test]
    fn test_read_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x03, 0x02, 0x23, 0x07]).unwrap();

        let bytes = read_file(file.path()).unwrap();
        assert_eq!(bytes, vec![0x03, 0x02, 0x23, 0x07]);
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.spv");

        match read_file(&missing) {
            Err(DriverError::ShaderLoad { path, source }) => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected ShaderLoad error, got {:?}", other),
        }
    }
}
