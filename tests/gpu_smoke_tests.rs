//! Native backend smoke test.
//!
//! Opens a window, selects the first GPU and presents a few frames on every
//! native backend compiled in. The headless backend covers the frame protocol
//! in detail; this checks the real swapchain and fence paths end to end.
//!
//! Systems without a display skip with a message instead of failing. Run with:
//!
//! ```bash
//! cargo test --test gpu_smoke_tests -- --ignored
//! ```

#![cfg(any(target_os = "windows", target_os = "linux"))]

use std::sync::Arc;
use std::time::Duration;

use winit::dpi::PhysicalSize;
use winit::event_loop::{EventLoop, EventLoopBuilder};
use winit::platform::pump_events::EventLoopExtPumpEvents;
#[cfg(target_os = "windows")]
use winit::platform::windows::EventLoopBuilderExtWindows;
#[cfg(target_os = "linux")]
use winit::platform::x11::EventLoopBuilderExtX11;
use winit::window::{Window, WindowBuilder};

use render_driver::{
    create_driver, BackendType, DriverConfig, DriverError, DriverState, ErrorKind, NativeWindow,
};

/// Frames to present per backend.
const FRAMES_TO_RENDER: usize = 5;

fn native_backends() -> Vec<BackendType> {
    #[allow(unused_mut)]
    let mut backends = Vec::new();
    #[cfg(feature = "vulkan-backend")]
    backends.push(BackendType::Vulkan);
    #[cfg(all(windows, feature = "dx12-backend"))]
    backends.push(BackendType::Dx12);
    backends
}

/// One event loop per process, so every backend shares the window.
fn open_window() -> Option<(EventLoop<()>, Arc<Window>)> {
    let built = std::panic::catch_unwind(|| EventLoopBuilder::new().with_any_thread(true).build());
    let event_loop = match built {
        Ok(Ok(event_loop)) => event_loop,
        Ok(Err(e)) => {
            eprintln!("Skipping: failed to create event loop: {}", e);
            return None;
        }
        Err(_) => {
            eprintln!("Skipping: event loop creation panicked (no display?)");
            return None;
        }
    };
    let window = WindowBuilder::new()
        .with_title("render-driver smoke test")
        .with_inner_size(PhysicalSize::new(640, 480))
        .build(&event_loop);
    match window {
        Ok(window) => Some((event_loop, Arc::new(window))),
        Err(e) => {
            eprintln!("Skipping: failed to create window: {}", e);
            None
        }
    }
}

#[test]
#[ignore = "needs a display and a GPU"]
fn test_native_backends_present_frames() {
    let _ = env_logger::builder().is_test(true).try_init();

    let Some((mut event_loop, window)) = open_window() else {
        return;
    };

    for backend in native_backends() {
        let size = window.inner_size();
        let config = DriverConfig::default()
            .with_surface_size(size.width, size.height)
            .with_fence_timeout(Duration::from_secs(5));
        let surface: Arc<dyn NativeWindow> = window.clone();
        let mut driver = create_driver(backend, Some(surface), config).unwrap();

        if let Err(e) = driver.initialize() {
            eprintln!("Skipping {}: {}", backend, e);
            continue;
        }
        match driver.select_gpu(0) {
            Ok(()) => {}
            Err(e @ (DriverError::CapabilityUnsupported(_) | DriverError::SurfaceOutdated)) => {
                eprintln!("Skipping {}: {}", backend, e);
                continue;
            }
            Err(e) => panic!("{}: select_gpu failed: {}", backend, e),
        }
        let image_count = driver.surface_info().unwrap().image_count as usize;

        let mut presented = 0;
        for _ in 0..FRAMES_TO_RENDER * 2 {
            event_loop.pump_events(Some(Duration::ZERO), |_, _| {});
            match driver
                .prepare_frame()
                .and_then(|()| driver.present_frame())
            {
                Ok(()) => presented += 1,
                Err(e) if e.kind() == ErrorKind::Transient => {
                    eprintln!("{}: dropped frame: {}", backend, e)
                }
                Err(e) => panic!("{}: frame failed: {}", backend, e),
            }
            if presented == FRAMES_TO_RENDER {
                break;
            }
        }

        assert!(presented > 0, "{} presented no frames", backend);
        assert_eq!(driver.state(), DriverState::DeviceSelected);
        assert!(driver.frame_index().unwrap() < image_count);
    }
}
