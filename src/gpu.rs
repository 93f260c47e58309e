//! Physical adapter descriptor.

use std::fmt;

/// Longest adapter name kept, in bytes.
pub const MAX_GPU_NAME_LEN: usize = 256;

/// One physical rendering device found during `initialize`.
///
/// Immutable once produced; `id` is the index to pass to
/// [`Driver::select_gpu`](crate::Driver::select_gpu).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gpu {
    pub id: u32,
    pub name: String,
    /// Device memory in megabytes
    pub memory: u32,
    pub vendor_id: u32,
    pub device_id: u32,
    /// Software rasterizer or virtualized device
    pub software: bool,
}

impl Gpu {
    pub fn new(
        id: u32,
        name: &str,
        memory: u32,
        vendor_id: u32,
        device_id: u32,
        software: bool,
    ) -> Self {
        Self {
            id,
            name: truncate_name(name).to_string(),
            memory,
            vendor_id,
            device_id,
            software,
        }
    }

    /// Convert a byte count to whole megabytes, saturating at `u32::MAX`.
    pub fn megabytes(bytes: u64) -> u32 {
        u32::try_from(bytes / (1024 * 1024)).unwrap_or(u32::MAX)
    }
}

impl fmt::Display for Gpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({} MB, vendor {:#06x}, device {:#06x}{})",
            self.id,
            self.name,
            self.memory,
            self.vendor_id,
            self.device_id,
            if self.software { ", software" } else { "" }
        )
    }
}

fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_GPU_NAME_LEN {
        return name;
    }
    let mut end = MAX_GPU_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
