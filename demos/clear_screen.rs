//! Clear screen demo
//!
//! Opens a window, selects a GPU and runs the prepare/present loop. With
//! `--shaders` a coloured triangle is drawn from precompiled shaders named
//! `triangle.vert` and `triangle.frag` (plus the backend's suffix).
//!
//! ```text
//! cargo run --example clear_screen -- --list-gpus
//! cargo run --example clear_screen -- --backend vulkan --gpu 1 --frames 600
//! cargo run --example clear_screen -- --backend headless --frames 10
//! ```

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    window::WindowBuilder,
};

use render_driver::{
    create_driver, BackendType, Driver, DriverConfig, DriverError, NativeWindow,
    PresentPreferences, ShaderStage, Vertex,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliBackend {
    /// Vulkan via ash.
    Vulkan,
    /// Direct3D 12 (Windows only).
    Dx12,
    /// Simulated adapters, no window.
    Headless,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Vulkan => BackendType::Vulkan,
            CliBackend::Dx12 => BackendType::Dx12,
            CliBackend::Headless => BackendType::Headless,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "clear_screen", about = "Render driver clear screen demo", version)]
struct Args {
    /// Graphics backend to use.
    #[arg(long, default_value = "vulkan", value_enum)]
    backend: CliBackend,

    /// Id of the GPU to render with (see --list-gpus).
    #[arg(long, default_value = "0")]
    gpu: u32,

    /// Wait for vertical blank.
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    vsync: bool,

    /// Use three render targets instead of two.
    #[arg(long)]
    triple_buffering: bool,

    /// Exit after this many presented frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Print the enumerated GPUs and exit.
    #[arg(long)]
    list_gpus: bool,

    /// Directory holding precompiled triangle shaders.
    #[arg(long)]
    shaders: Option<PathBuf>,
}

// ============================================================================
// Frame Loop
// ============================================================================

/// Render loop state shared between the windowed and headless paths.
struct Demo {
    driver: Box<dyn Driver>,
    gpu: u32,
    frames: u64,
    max_frames: Option<u64>,
    /// The surface went out of date and the device still needs rebuilding.
    outdated: bool,
}

enum Step {
    Continue,
    Exit,
}

impl Demo {
    /// Reselect the GPU. A minimized window keeps the surface out of date,
    /// so the rebuild is retried on later frames.
    fn rebuild(&mut self) -> Result<(), DriverError> {
        match self.driver.select_gpu(self.gpu) {
            Ok(()) => {
                self.outdated = false;
                Ok(())
            }
            Err(DriverError::SurfaceOutdated) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn frame(&mut self) -> Step {
        if self.outdated {
            if let Err(e) = self.rebuild() {
                log::error!("Failed to rebuild the device: {}", e);
                return Step::Exit;
            }
            if self.outdated {
                return Step::Continue;
            }
        }

        let result = self
            .driver
            .prepare_frame()
            .and_then(|()| self.driver.present_frame());

        match result {
            Ok(()) => self.frames += 1,
            Err(DriverError::SurfaceOutdated) => {
                log::warn!("Surface out of date, rebuilding the device");
                self.outdated = true;
            }
            Err(e) if e.is_transient() => log::warn!("Dropped frame {}: {}", self.frames, e),
            Err(e) => {
                log::error!("Rendering stopped after {} frames: {}", self.frames, e);
                return Step::Exit;
            }
        }

        match self.max_frames {
            Some(max) if self.frames >= max => {
                log::info!("Presented {} frames", self.frames);
                Step::Exit
            }
            _ => Step::Continue,
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

fn triangle() -> [Vertex; 3] {
    [
        Vertex::new([0.0, -0.5, 0.0], [1.0, 0.0, 0.0, 1.0]),
        Vertex::new([0.5, 0.5, 0.0], [0.0, 1.0, 0.0, 1.0]),
        Vertex::new([-0.5, 0.5, 0.0], [0.0, 0.0, 1.0, 1.0]),
    ]
}

fn add_triangle(driver: &mut dyn Driver, shaders: &Path) -> Result<(), DriverError> {
    let handle = driver.create_renderable()?;
    let renderable = driver.renderable_mut(handle)?;
    renderable.attach_shader(&shaders.join("triangle.vert"), ShaderStage::Vertex)?;
    renderable.attach_shader(&shaders.join("triangle.frag"), ShaderStage::Fragment)?;
    renderable.set_vertices(&triangle())?;
    renderable.set_indices(&[0, 1, 2])?;
    renderable.build()?;
    driver.add_renderable(handle)
}

/// Create, initialize and configure the driver. Returns `None` after
/// `--list-gpus`.
fn setup(
    args: &Args,
    window: Option<Arc<dyn NativeWindow>>,
    size: (u32, u32),
) -> Result<Option<Demo>, Box<dyn Error>> {
    let config = DriverConfig::default()
        .with_surface_size(size.0, size.1)
        .with_render_target_count(if args.triple_buffering { 3 } else { 2 })
        .with_present(PresentPreferences {
            vsync: args.vsync,
            triple_buffering: args.triple_buffering,
            tearing: false,
        });

    let mut driver = create_driver(args.backend.into(), window, config)?;
    driver.initialize()?;

    if args.list_gpus {
        for gpu in driver.gpus() {
            println!("{}", gpu);
        }
        return Ok(None);
    }

    driver.select_gpu(args.gpu)?;
    if let Some(surface) = driver.surface_info() {
        log::info!(
            "Rendering {}x{} with {} render targets",
            surface.width,
            surface.height,
            surface.image_count
        );
    }
    if let Some(shaders) = &args.shaders {
        add_triangle(driver.as_mut(), shaders)?;
    }

    Ok(Some(Demo {
        driver,
        gpu: args.gpu,
        frames: 0,
        max_frames: args.frames,
        outdated: false,
    }))
}

fn run_headless(args: &Args) -> Result<(), Box<dyn Error>> {
    let Some(mut demo) = setup(args, None, (1024, 768))? else {
        return Ok(());
    };
    if demo.max_frames.is_none() {
        demo.max_frames = Some(60);
    }
    while let Step::Continue = demo.frame() {}
    Ok(())
}

fn run_windowed(args: &Args) -> Result<(), Box<dyn Error>> {
    let (width, height) = (1024, 768);
    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(format!("Render Driver ({})", BackendType::from(args.backend)))
            .with_inner_size(PhysicalSize::new(width, height))
            .build(&event_loop)?,
    );

    let surface_window: Arc<dyn NativeWindow> = window.clone();
    let Some(mut demo) = setup(args, Some(surface_window), (width, height))? else {
        return Ok(());
    };

    event_loop.run(move |event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                ..
            } => elwt.exit(),
            Event::AboutToWait => {
                if let Step::Exit = demo.frame() {
                    elwt.exit();
                }
                window.request_redraw();
            }
            _ => {}
        }
    })?;
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let result = match args.backend {
        CliBackend::Headless => run_headless(&args),
        CliBackend::Vulkan | CliBackend::Dx12 => run_windowed(&args),
    };
    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
