//! Bump allocator over a staging buffer mirrored by a GPU uniform buffer.
//!
//! Uniform blocks claim their region for the frame with [`UniformArena::advance`], serialize into
//! the staging bytes, and the written prefix is flushed with [`UniformArena::copy_to_device`].
//! The cursor only moves forward until the next [`UniformArena::reset`].

use crate::backend::{BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend};
use crate::error::{ArenaError, BackendResult};
use crate::uniform::value::align_up;

/// The shared arenas a renderer packs its uniform blocks into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArenaKind {
    /// Per-object matrices and material blocks
    ObjectData,
    /// Camera and light parameters
    LightParameters,
    /// Stereo projection parameters
    VrParameters,
    /// Per-object dynamic shader properties
    ShaderProperties,
    /// Per-pass shader parameters
    ShaderParameters,
}

impl ArenaKind {
    pub const ALL: [ArenaKind; 5] = [
        ArenaKind::ObjectData,
        ArenaKind::LightParameters,
        ArenaKind::VrParameters,
        ArenaKind::ShaderProperties,
        ArenaKind::ShaderParameters,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ArenaKind::ObjectData => "UBOBuffer",
            ArenaKind::LightParameters => "LightParametersBuffer",
            ArenaKind::VrParameters => "VRParametersBuffer",
            ArenaKind::ShaderProperties => "ShaderPropertyBuffer",
            ArenaKind::ShaderParameters => "ShaderParametersBuffer",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Byte capacities of the five arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaCapacities {
    pub object_data: usize,
    pub light_parameters: usize,
    pub vr_parameters: usize,
    pub shader_properties: usize,
    pub shader_parameters: usize,
}

impl Default for ArenaCapacities {
    fn default() -> Self {
        Self {
            object_data: 10 * 1024 * 1024,
            light_parameters: 10 * 1024 * 1024,
            vr_parameters: 2 * 1024,
            shader_properties: 10 * 1024 * 1024,
            shader_parameters: 128 * 1024,
        }
    }
}

impl ArenaCapacities {
    pub fn get(&self, kind: ArenaKind) -> usize {
        match kind {
            ArenaKind::ObjectData => self.object_data,
            ArenaKind::LightParameters => self.light_parameters,
            ArenaKind::VrParameters => self.vr_parameters,
            ArenaKind::ShaderProperties => self.shader_properties,
            ArenaKind::ShaderParameters => self.shader_parameters,
        }
    }
}

/// A fixed-capacity uniform arena.
#[derive(Debug)]
pub struct UniformArena {
    kind: ArenaKind,
    staging: Vec<u8>,
    cursor: usize,
    alignment: usize,
    buffer: Option<BufferHandle>,
}

impl UniformArena {
    /// Create a CPU-only arena. Nothing is uploaded until a GPU buffer is attached.
    pub fn new(kind: ArenaKind, capacity: usize, alignment: usize) -> Self {
        Self {
            kind,
            staging: vec![0; capacity],
            cursor: 0,
            alignment: alignment.max(1),
            buffer: None,
        }
    }

    /// Create an arena backed by a GPU uniform buffer of the same capacity, using the device's
    /// minimum uniform offset alignment.
    pub fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        kind: ArenaKind,
        capacity: usize,
    ) -> BackendResult<Self> {
        let alignment = backend.min_uniform_offset_alignment() as usize;
        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(kind.label().to_string()),
            size: capacity as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        log::debug!(
            "Created {} with capacity {} and alignment {}",
            kind.label(),
            capacity,
            alignment
        );
        let mut arena = Self::new(kind, capacity, alignment);
        arena.buffer = Some(buffer);
        Ok(arena)
    }

    pub fn kind(&self) -> ArenaKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.staging.len()
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Current write cursor.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn buffer(&self) -> Option<BufferHandle> {
        self.buffer
    }

    /// Rewind the write cursor to 0. Capacity and staging contents are untouched.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Round the cursor up to a multiple of `alignment` and return the new offset.
    pub fn advance(&mut self, alignment: usize) -> Result<usize, ArenaError> {
        let offset = align_up(self.cursor, alignment.max(1));
        if offset > self.capacity() {
            return Err(self.exhausted(offset));
        }
        self.cursor = offset;
        Ok(offset)
    }

    /// [`Self::advance`] with the arena's own alignment.
    pub fn advance_default(&mut self) -> Result<usize, ArenaError> {
        self.advance(self.alignment)
    }

    /// Claim `size` bytes at the next aligned offset.
    pub fn allocate(&mut self, size: usize) -> Result<usize, ArenaError> {
        let offset = self.advance_default()?;
        self.reserve_until(offset + size)?;
        Ok(offset)
    }

    /// Move the cursor forward so that it is at least `end`.
    pub(crate) fn reserve_until(&mut self, end: usize) -> Result<(), ArenaError> {
        if end > self.capacity() {
            return Err(self.exhausted(end));
        }
        self.cursor = self.cursor.max(end);
        Ok(())
    }

    /// Copy `bytes` into the staging buffer at `offset`.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), ArenaError> {
        let end = offset + bytes.len();
        if end > self.capacity() {
            return Err(self.exhausted(end));
        }
        self.staging[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Staging bytes written since the last reset.
    pub fn written(&self) -> &[u8] {
        &self.staging[..self.cursor]
    }

    /// Raw staging bytes in `range`.
    pub fn bytes(&self, range: std::ops::Range<usize>) -> &[u8] {
        &self.staging[range]
    }

    /// Flush the written prefix of the staging buffer to the GPU buffer.
    ///
    /// Returns `false` when there is nothing to upload.
    pub fn copy_to_device<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) -> bool {
        match self.buffer {
            Some(buffer) if self.cursor > 0 => {
                backend.write_buffer(buffer, 0, self.written());
                true
            }
            _ => false,
        }
    }

    /// Destroy the GPU buffer.
    pub fn release<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(buffer) = self.buffer.take() {
            backend.destroy_buffer(buffer);
        }
        self.cursor = 0;
    }

    fn exhausted(&self, requested: usize) -> ArenaError {
        ArenaError::Exhausted {
            arena: self.kind,
            requested,
            capacity: self.capacity(),
        }
    }
}

/// One arena per [`ArenaKind`].
#[derive(Debug)]
pub struct UniformArenas {
    arenas: Vec<UniformArena>,
}

impl UniformArenas {
    pub fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        capacities: &ArenaCapacities,
    ) -> BackendResult<Self> {
        let arenas = ArenaKind::ALL
            .iter()
            .map(|kind| UniformArena::create(backend, *kind, capacities.get(*kind)))
            .collect::<BackendResult<Vec<_>>>()?;
        Ok(Self { arenas })
    }

    pub fn get(&self, kind: ArenaKind) -> &UniformArena {
        &self.arenas[kind.index()]
    }

    pub fn get_mut(&mut self, kind: ArenaKind) -> &mut UniformArena {
        &mut self.arenas[kind.index()]
    }

    pub fn release<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for arena in &mut self.arenas {
            arena.release(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn test_sequential_allocations_consume_alignment_boundaries() {
        let mut arena = UniformArena::new(ArenaKind::ObjectData, 1024, 256);
        assert_eq!(arena.allocate(10).unwrap(), 0);
        assert_eq!(arena.allocate(10).unwrap(), 256);
        assert_eq!(arena.allocate(10).unwrap(), 512);
    }

    #[test]
    fn test_advance_is_aligned_and_monotonic() {
        let mut arena = UniformArena::new(ArenaKind::ObjectData, 4096, 64);
        let mut last = 0;
        for size in [1usize, 63, 64, 65, 200, 3] {
            let offset = arena.advance(64).unwrap();
            assert_eq!(offset % 64, 0);
            assert!(offset >= last);
            last = offset;
            arena.reserve_until(offset + size).unwrap();
        }
    }

    #[test]
    fn test_reset_rewinds_cursor() {
        let mut arena = UniformArena::new(ArenaKind::ShaderParameters, 1024, 256);
        arena.allocate(300).unwrap();
        assert_eq!(arena.cursor(), 300);
        arena.reset();
        assert_eq!(arena.cursor(), 0);
        assert_eq!(arena.capacity(), 1024);
        assert_eq!(arena.allocate(1).unwrap(), 0);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let mut arena = UniformArena::new(ArenaKind::VrParameters, 512, 256);
        arena.allocate(300).unwrap();
        assert!(matches!(
            arena.allocate(300),
            Err(ArenaError::Exhausted { arena: ArenaKind::VrParameters, .. })
        ));
    }

    #[test]
    fn test_copy_to_device_uploads_written_prefix() {
        let mut backend = HeadlessBackend::new(8, 8).with_alignment(64);
        let mut arena =
            UniformArena::create(&mut backend, ArenaKind::LightParameters, 256).unwrap();
        assert_eq!(arena.alignment(), 64);
        assert!(!arena.copy_to_device(&mut backend));

        let offset = arena.allocate(4).unwrap();
        arena.write(offset, &[1, 2, 3, 4]).unwrap();
        assert!(arena.copy_to_device(&mut backend));

        let gpu = backend.buffer_data(arena.buffer().unwrap()).unwrap();
        assert_eq!(&gpu[..4], &[1, 2, 3, 4]);
    }
}
