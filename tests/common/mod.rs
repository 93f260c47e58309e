//! Common utilities for driver integration tests.
//!
//! Everything here runs against the headless backend, so the suites need
//! neither a GPU nor a window.

#![allow(dead_code)]

use std::sync::Arc;

use log::{Level, Log, Metadata, Record};
use parking_lot::Mutex;

use render_driver::backend::headless::{FrameEvent, HeadlessDriver, SimulatedAdapter};
use render_driver::{
    Driver, DriverConfig, LogSink, RenderableHandle, ShaderStage, Vertex,
};

/// Bytes standing in for a compiled vertex shader.
pub const VERTEX_BYTECODE: &[u8] = &[0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];

/// Bytes standing in for a compiled fragment shader.
pub const FRAGMENT_BYTECODE: &[u8] = &[0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x02, 0x00];

// ============================================================================
// Driver Setup
// ============================================================================

pub fn quiet_config() -> DriverConfig {
    DriverConfig::default().with_log(LogSink::silent())
}

/// A headless driver with `adapters`, initialized but no GPU selected.
pub fn initialized(adapters: Vec<SimulatedAdapter>, config: DriverConfig) -> HeadlessDriver {
    let mut driver = HeadlessDriver::with_adapters(adapters, config);
    driver.initialize().expect("initialize");
    driver
}

/// A headless driver over the default adapters with GPU 0 selected.
pub fn ready(config: DriverConfig) -> HeadlessDriver {
    let mut driver = HeadlessDriver::new(config);
    driver.initialize().expect("initialize");
    driver.select_gpu(0).expect("select_gpu");
    driver
}

pub fn two_adapters() -> Vec<SimulatedAdapter> {
    vec![
        SimulatedAdapter::new("Simulated A", 4096, 0x1002, 0x73bf),
        SimulatedAdapter::new("Simulated B", 2048, 0x8086, 0x56a0),
    ]
}

// ============================================================================
// Renderables
// ============================================================================

pub fn triangle() -> [Vertex; 3] {
    [
        Vertex::new([0.0, 0.5, 0.0], [1.0, 0.0, 0.0, 1.0]),
        Vertex::new([0.5, -0.5, 0.0], [0.0, 1.0, 0.0, 1.0]),
        Vertex::new([-0.5, -0.5, 0.0], [0.0, 0.0, 1.0, 1.0]),
    ]
}

/// Create, populate and build a triangle renderable.
pub fn built_triangle(driver: &mut dyn Driver) -> RenderableHandle {
    let handle = driver.create_renderable().expect("create_renderable");
    let renderable = driver.renderable_mut(handle).expect("renderable_mut");
    renderable
        .attach_shader_bytecode(VERTEX_BYTECODE, ShaderStage::Vertex)
        .expect("vertex stage");
    renderable
        .attach_shader_bytecode(FRAGMENT_BYTECODE, ShaderStage::Fragment)
        .expect("fragment stage");
    renderable.set_vertices(&triangle()).expect("vertices");
    renderable.set_indices(&[0, 1, 2]).expect("indices");
    renderable.build().expect("build");
    handle
}

/// Run `frames` prepare/present cycles, failing on the first error.
pub fn run_frames(driver: &mut dyn Driver, frames: usize) {
    for frame in 0..frames {
        driver
            .prepare_frame()
            .unwrap_or_else(|e| panic!("prepare_frame {}: {}", frame, e));
        driver
            .present_frame()
            .unwrap_or_else(|e| panic!("present_frame {}: {}", frame, e));
    }
}

// ============================================================================
// Frame Protocol
// ============================================================================

/// Check that no slot was reset while its last submission was outstanding.
///
/// Returns how many resets reused a slot that had been submitted before.
pub fn assert_slots_waited_before_reuse(trace: &[FrameEvent], slots: usize) -> usize {
    let mut last_submitted: Vec<Option<u64>> = vec![None; slots];
    let mut completed = 0;
    let mut reuses = 0;

    for (i, event) in trace.iter().enumerate() {
        match *event {
            FrameEvent::Reset { slot } => {
                if let Some(value) = last_submitted[slot] {
                    assert!(
                        value <= completed,
                        "event {}: slot {} reset with value {} outstanding (completed {})",
                        i,
                        slot,
                        value,
                        completed
                    );
                    reuses += 1;
                }
            }
            FrameEvent::Submit { slot, value } => last_submitted[slot] = Some(value),
            FrameEvent::Waited { value } => completed = completed.max(value),
            FrameEvent::Record { .. } | FrameEvent::Present { .. } => {}
        }
    }
    reuses
}

// ============================================================================
// Logging
// ============================================================================

/// Logger that records everything at `Info` and above.
#[derive(Default)]
pub struct CaptureLogger {
    records: Mutex<Vec<(Level, String, String)>>,
}

impl CaptureLogger {
    pub fn sink() -> (Arc<Self>, LogSink) {
        let logger = Arc::new(Self::default());
        let sink = LogSink::new(logger.clone());
        (logger, sink)
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|(l, _, _)| *l == level)
            .map(|(_, _, message)| message.clone())
            .collect()
    }

    pub fn targets(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .map(|(_, target, _)| target.clone())
            .collect()
    }
}

impl Log for CaptureLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.records.lock().push((
                record.level(),
                record.target().to_string(),
                record.args().to_string(),
            ));
        }
    }

    fn flush(&self) {}
}
