//! Per-drawable GPU state.
//!
//! A renderable collects shader stages and vertex/index data, then `build`
//! bakes a pipeline plus a replayable command sequence (a secondary command
//! buffer on Vulkan, a bundle on D3D12). Drivers own their renderables in a
//! [`RenderableArena`] and hand out [`RenderableHandle`]s.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::Path;

use crate::error::{DriverError, DriverResult};
use crate::shader::{self, ShaderStage, ENTRY_POINT};
use crate::types::{PrimitiveTopology, TextureFormat, Vertex};

/// Lifecycle of a renderable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderableStatus {
    /// Nothing attached yet.
    #[default]
    Empty,
    /// Inputs changed since the last successful build.
    Pending,
    /// Ready for replay.
    Built,
    /// A GPU object failed to create; the renderable must be recreated.
    Broken,
}

/// Interface every backend renderable implements.
pub trait Renderable {
    /// Bytecode file suffix appended by [`attach_shader`](Self::attach_shader).
    fn shader_suffix(&self) -> &'static str;

    /// Load precompiled bytecode for `stage` from `path` plus the backend suffix.
    fn attach_shader(&mut self, path: &Path, stage: ShaderStage) -> DriverResult<()> {
        let resolved = shader::resolve_shader_path(path, self.shader_suffix());
        let bytecode = shader::read_file(&resolved)?;
        self.attach_shader_bytecode(&bytecode, stage)
    }

    fn attach_shader_bytecode(&mut self, bytecode: &[u8], stage: ShaderStage)
        -> DriverResult<()>;

    fn set_vertices(&mut self, vertices: &[Vertex]) -> DriverResult<()>;

    /// Upload 16-bit indices. An empty slice removes the index buffer.
    fn set_indices(&mut self, indices: &[u16]) -> DriverResult<()>;

    /// Bake the pipeline and the replayable draw commands.
    fn build(&mut self) -> DriverResult<()>;

    fn status(&self) -> RenderableStatus;

    /// Content of the last successful build.
    fn pipeline_descriptor(&self) -> Option<&PipelineDescriptor>;
}

/// One shader stage as recorded in a [`PipelineDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageDescriptor {
    pub stage: ShaderStage,
    pub entry_point: &'static str,
    pub bytecode_len: usize,
    pub bytecode_hash: u64,
}

/// Formats a pipeline is built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetFormats {
    pub color: TextureFormat,
    pub depth: Option<TextureFormat>,
}

/// Backend-neutral description of a built pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineDescriptor {
    pub stages: Vec<StageDescriptor>,
    pub vertex_stride: u32,
    pub vertex_count: u32,
    pub index_count: Option<u32>,
    pub topology: PrimitiveTopology,
    pub targets: TargetFormats,
    pub depth_test: bool,
}

/// CPU-side bookkeeping shared by every backend renderable.
#[derive(Debug, Default)]
pub struct RenderableInputs {
    stages: BTreeMap<ShaderStage, StageDescriptor>,
    vertex_count: u32,
    index_count: Option<u32>,
    status: RenderableStatus,
    descriptor: Option<PipelineDescriptor>,
}

impl RenderableInputs {
    pub fn status(&self) -> RenderableStatus {
        self.status
    }

    pub fn descriptor(&self) -> Option<&PipelineDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> Option<u32> {
        self.index_count
    }

    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.stages.contains_key(&stage)
    }

    /// Whether either tessellation stage is attached.
    pub fn tessellated(&self) -> bool {
        self.has_stage(ShaderStage::TessellationControl)
            || self.has_stage(ShaderStage::TessellationEvaluation)
    }

    /// Reject mutation of a broken renderable.
    pub fn ensure_usable(&self) -> DriverResult<()> {
        if self.status == RenderableStatus::Broken {
            return Err(DriverError::InvalidRenderable(
                "renderable is broken and must be recreated".into(),
            ));
        }
        Ok(())
    }

    pub fn record_shader(&mut self, stage: ShaderStage, bytecode: &[u8]) {
        let mut hasher = DefaultHasher::new();
        bytecode.hash(&mut hasher);
        self.stages.insert(
            stage,
            StageDescriptor {
                stage,
                entry_point: ENTRY_POINT,
                bytecode_len: bytecode.len(),
                bytecode_hash: hasher.finish(),
            },
        );
        self.touch();
    }

    pub fn record_vertices(&mut self, count: usize) -> DriverResult<u32> {
        if count == 0 {
            return Err(DriverError::InvalidRenderable("vertex list is empty".into()));
        }
        self.vertex_count = u32::try_from(count)
            .map_err(|_| DriverError::InvalidRenderable(format!("{} vertices", count)))?;
        self.touch();
        Ok(self.vertex_count)
    }

    pub fn record_indices(&mut self, count: usize) -> DriverResult<Option<u32>> {
        self.index_count = match count {
            0 => None,
            n => Some(
                u32::try_from(n)
                    .map_err(|_| DriverError::InvalidRenderable(format!("{} indices", n)))?,
            ),
        };
        self.touch();
        Ok(self.index_count)
    }

    /// Check the inputs are complete enough to build.
    pub fn validate(&self) -> DriverResult<()> {
        self.ensure_usable()?;
        if !self.has_stage(ShaderStage::Vertex) {
            return Err(DriverError::InvalidRenderable(
                "no vertex shader attached".into(),
            ));
        }
        if self.vertex_count == 0 {
            return Err(DriverError::InvalidRenderable("no vertices set".into()));
        }
        Ok(())
    }

    pub fn describe(&self, targets: TargetFormats) -> PipelineDescriptor {
        PipelineDescriptor {
            stages: self.stages.values().cloned().collect(),
            vertex_stride: Vertex::STRIDE,
            vertex_count: self.vertex_count,
            index_count: self.index_count,
            topology: if self.tessellated() {
                PrimitiveTopology::PatchList
            } else {
                PrimitiveTopology::TriangleList
            },
            targets,
            depth_test: targets.depth.is_some(),
        }
    }

    pub fn finish_build(&mut self, descriptor: PipelineDescriptor) {
        self.descriptor = Some(descriptor);
        self.status = RenderableStatus::Built;
    }

    /// Mark the renderable broken and pass the error through.
    pub fn fail(&mut self, error: DriverError) -> DriverError {
        self.status = RenderableStatus::Broken;
        error
    }

    fn touch(&mut self) {
        self.status = RenderableStatus::Pending;
    }
}

/// Stable reference to a renderable owned by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderableHandle {
    index: u32,
    generation: u32,
}

struct ArenaSlot<R> {
    generation: u32,
    value: Option<R>,
}

/// Generational arena of renderables plus their replay order.
pub struct RenderableArena<R> {
    slots: Vec<ArenaSlot<R>>,
    free: Vec<u32>,
    registered: Vec<RenderableHandle>,
}

impl<R> Default for RenderableArena<R> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            registered: Vec::new(),
        }
    }
}

impl<R: Renderable> RenderableArena<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: R) -> RenderableHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return RenderableHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(ArenaSlot {
            generation: 0,
            value: Some(value),
        });
        RenderableHandle {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, handle: RenderableHandle) -> DriverResult<&R> {
        self.slot(handle)
            .and_then(|slot| slot.value.as_ref())
            .ok_or(DriverError::UnknownRenderable(handle))
    }

    pub fn get_mut(&mut self, handle: RenderableHandle) -> DriverResult<&mut R> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
            .ok_or(DriverError::UnknownRenderable(handle))
    }

    /// Add a built renderable to the replay list; registering twice is a no-op.
    pub fn register(&mut self, handle: RenderableHandle) -> DriverResult<()> {
        let status = self.get(handle)?.status();
        if status != RenderableStatus::Built {
            return Err(DriverError::InvalidRenderable(format!(
                "cannot register a renderable in status {:?}",
                status
            )));
        }
        if !self.registered.contains(&handle) {
            self.registered.push(handle);
        }
        Ok(())
    }

    pub fn remove(&mut self, handle: RenderableHandle) -> DriverResult<R> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(DriverError::UnknownRenderable(handle))?;
        let value = slot.value.take().ok_or(DriverError::UnknownRenderable(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.registered.retain(|h| *h != handle);
        Ok(value)
    }

    /// Drop every renderable and invalidate all outstanding handles.
    pub fn clear(&mut self) {
        self.registered.clear();
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.value = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn registered_len(&self) -> usize {
        self.registered.len()
    }

    /// Registered renderables in registration order, skipping any that
    /// were modified and not rebuilt.
    pub fn replay(&self) -> impl Iterator<Item = &R> + '_ {
        self.registered
            .iter()
            .filter_map(|handle| self.get(*handle).ok())
            .filter(|r| r.status() == RenderableStatus::Built)
    }

    fn slot(&self, handle: RenderableHandle) -> Option<&ArenaSlot<R>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;

    /// CPU-only renderable for exercising the arena.
    #[derive(Default)]
    struct Recorded {
        inputs: RenderableInputs,
    }

    impl Renderable for Recorded {
        fn shader_suffix(&self) -> &'static str {
            ".bin"
        }

        fn attach_shader_bytecode(
            &mut self,
            bytecode: &[u8],
            stage: ShaderStage,
        ) -> DriverResult<()> {
            self.inputs.ensure_usable()?;
            self.inputs.record_shader(stage, bytecode);
            Ok(())
        }

        fn set_vertices(&mut self, vertices: &[Vertex]) -> DriverResult<()> {
            self.inputs.ensure_usable()?;
            self.inputs.record_vertices(vertices.len()).map(|_| ())
        }

        fn set_indices(&mut self, indices: &[u16]) -> DriverResult<()> {
            self.inputs.ensure_usable()?;
            self.inputs.record_indices(indices.len()).map(|_| ())
        }

        fn build(&mut self) -> DriverResult<()> {
            self.inputs.validate()?;
            let descriptor = self.inputs.describe(TargetFormats {
                color: TextureFormat::Rgba8Unorm,
                depth: None,
            });
            self.inputs.finish_build(descriptor);
            Ok(())
        }

        fn status(&self) -> RenderableStatus {
            self.inputs.status()
        }

        fn pipeline_descriptor(&self) -> Option<&PipelineDescriptor> {
            self.inputs.descriptor()
        }
    }

    fn built() -> Recorded {
        let mut r = Recorded::default();
        r.attach_shader_bytecode(&[1, 2, 3, 4], ShaderStage::Vertex)
            .unwrap();
        r.set_vertices(&[Vertex::new([0.0; 3], [1.0; 4]); 3]).unwrap();
        r.build().unwrap();
        r
    }

    #[test]
    fn test_status_transitions() {
        let mut r = Recorded::default();
        assert_eq!(r.status(), RenderableStatus::Empty);

        assert!(matches!(r.build(), Err(DriverError::InvalidRenderable(_))));
        assert_eq!(r.status(), RenderableStatus::Empty);

        r.attach_shader_bytecode(&[0; 8], ShaderStage::Vertex).unwrap();
        assert_eq!(r.status(), RenderableStatus::Pending);
        assert!(r.build().is_err());

        r.set_vertices(&[Vertex::new([0.0; 3], [1.0; 4])]).unwrap();
        r.build().unwrap();
        assert_eq!(r.status(), RenderableStatus::Built);

        r.set_indices(&[0]).unwrap();
        assert_eq!(r.status(), RenderableStatus::Pending);
    }

    #[test]
    fn test_empty_vertices_rejected() {
        let mut r = Recorded::default();
        assert!(r.set_vertices(&[]).is_err());
        assert_eq!(r.status(), RenderableStatus::Empty);
    }

    #[test]
    fn test_broken_renderable_rejects_mutation() {
        let mut r = built();
        let err = r
            .inputs
            .fail(DriverError::creation("pipeline", "simulated"));
        assert!(matches!(err, DriverError::ResourceCreationFailed { .. }));
        assert_eq!(r.status(), RenderableStatus::Broken);
        assert!(r.set_indices(&[0, 1, 2]).is_err());
        assert!(r.build().is_err());
    }

    #[test]
    fn test_descriptor_tracks_inputs() {
        let mut r = built();
        let first = r.pipeline_descriptor().cloned().unwrap();
        assert_eq!(first.vertex_count, 3);
        assert_eq!(first.vertex_stride, 28);
        assert_eq!(first.stages.len(), 1);
        assert_eq!(first.stages[0].entry_point, "main");

        r.attach_shader_bytecode(&[9, 9], ShaderStage::Fragment).unwrap();
        r.build().unwrap();
        let second = r.pipeline_descriptor().unwrap();
        assert_ne!(&first, second);
        // Stage order is fixed regardless of attach order.
        assert_eq!(second.stages[0].stage, ShaderStage::Vertex);
        assert_eq!(second.stages[1].stage, ShaderStage::Fragment);
    }

    #[test]
    fn test_arena_handles() {
        let mut arena = RenderableArena::new();
        let a = arena.insert(built());
        let b = arena.insert(Recorded::default());
        assert_eq!(arena.len(), 2);

        arena.register(a).unwrap();
        arena.register(a).unwrap();
        assert_eq!(arena.registered_len(), 1);
        assert!(matches!(
            arena.register(b),
            Err(DriverError::InvalidRenderable(_))
        ));

        arena.remove(a).unwrap();
        assert_eq!(arena.registered_len(), 0);
        assert!(matches!(arena.get(a), Err(DriverError::UnknownRenderable(h)) if h == a));

        // Slot is reused with a new generation.
        let c = arena.insert(built());
        assert_ne!(a, c);
        assert!(arena.get(a).is_err());
        assert!(arena.get(c).is_ok());
    }

    #[test]
    fn test_arena_clear_invalidates_handles() {
        let mut arena = RenderableArena::new();
        let a = arena.insert(built());
        arena.register(a).unwrap();

        arena.clear();
        assert!(arena.is_empty());
        assert_eq!(arena.registered_len(), 0);
        assert!(arena.get_mut(a).is_err());
        assert!(arena.remove(a).is_err());
    }

    #[test]
    fn test_replay_skips_pending() {
        let mut arena = RenderableArena::new();
        let a = arena.insert(built());
        let b = arena.insert(built());
        arena.register(b).unwrap();
        arena.register(a).unwrap();
        assert_eq!(arena.replay().count(), 2);

        arena.get_mut(b).unwrap().set_indices(&[0, 1, 2]).unwrap();
        assert_eq!(arena.replay().count(), 1);

        arena.get_mut(b).unwrap().build().unwrap();
        let order: Vec<_> = arena
            .replay()
            .map(|r| r.pipeline_descriptor().unwrap().index_count)
            .collect();
        assert_eq!(order, vec![Some(3), None]);
    }
}
