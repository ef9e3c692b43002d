//! # PAL Smoke Demo
//!
//! Builds an indexed quad from two attribute buffers, then animates it for a
//! number of frames by editing elements between draws. Useful as a quick
//! check that a backend accepts the upload and draw traffic the PAL emits.
//!
//! ```bash
//! # Run against the dummy backend and print call counters
//! cargo run -p redlilium-pal-demos --bin pal_smoke -- --backend dummy
//!
//! # Run against wgpu on Vulkan for 600 frames
//! cargo run -p redlilium-pal-demos --bin pal_smoke -- --backend wgpu --gpu-api vulkan --frames 600
//! ```

use std::sync::Arc;

use clap::Parser;
use redlilium_pal::{
    AttributeBufferDescriptor, BackendType, BufferHandle, BufferMode, DummyBackend,
    GraphicsError, GraphicsInterface, IndexFormat, InstanceParameters, PrimitiveTopology,
    VertexArrayHandle, VertexAttribute, VertexDataType, WgpuBackendType,
};

/// Backend selection for the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// Use wgpu when an adapter is available, otherwise the dummy backend.
    #[default]
    Auto,
    /// Cross-platform backend via wgpu.
    Wgpu,
    /// No-op backend that counts calls.
    Dummy,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Auto => BackendType::Auto,
            CliBackend::Wgpu => BackendType::Wgpu,
            CliBackend::Dummy => BackendType::Dummy,
        }
    }
}

/// Native API used by the wgpu backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliGpuApi {
    #[default]
    Auto,
    Vulkan,
    Metal,
    Dx12,
    Gl,
}

impl From<CliGpuApi> for WgpuBackendType {
    fn from(cli: CliGpuApi) -> Self {
        match cli {
            CliGpuApi::Auto => WgpuBackendType::Auto,
            CliGpuApi::Vulkan => WgpuBackendType::Vulkan,
            CliGpuApi::Metal => WgpuBackendType::Metal,
            CliGpuApi::Dx12 => WgpuBackendType::Dx12,
            CliGpuApi::Gl => WgpuBackendType::Gl,
        }
    }
}

/// RedLilium PAL smoke demo.
#[derive(Parser, Debug)]
#[command(name = "pal_smoke", about = "Drive the RedLilium PAL through a small animated mesh")]
struct Args {
    /// Graphics backend.
    #[arg(long, value_enum, default_value_t = CliBackend::Auto)]
    backend: CliBackend,

    /// Native API for the wgpu backend.
    #[arg(long = "gpu-api", value_enum, default_value_t = CliGpuApi::Auto)]
    gpu_api: CliGpuApi,

    /// Number of frames to draw.
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Enable backend validation.
    #[arg(long)]
    validation: bool,
}

const POSITIONS: [[f32; 3]; 4] = [
    [-0.5, -0.5, 0.0],
    [0.5, -0.5, 0.0],
    [0.5, 0.5, 0.0],
    [-0.5, 0.5, 0.0],
];

const INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

struct Mesh {
    positions: BufferHandle,
    colors: BufferHandle,
    vertex_array: VertexArrayHandle,
}

fn build_mesh(gi: &mut GraphicsInterface) -> Result<Mesh, GraphicsError> {
    let positions = gi.create_attribute_buffer(
        AttributeBufferDescriptor::new(12, 4)
            .with_label("quad positions")
            .with_mode(BufferMode::LongLived),
    )?;
    gi.set_elements(positions, Some(bytemuck::cast_slice(&POSITIONS)), 4, true)?;

    let colors = gi.create_attribute_buffer(
        AttributeBufferDescriptor::new(4, 4)
            .with_label("quad colors")
            .with_mode(BufferMode::Dynamic),
    )?;
    let white = [[255u8; 4]; 4];
    gi.set_elements(colors, Some(bytemuck::cast_slice(&white)), 4, true)?;

    let indices = gi.create_attribute_buffer(
        AttributeBufferDescriptor::index(IndexFormat::Uint16, 6).with_label("quad indices"),
    )?;
    gi.set_elements(indices, Some(bytemuck::cast_slice(&INDICES)), 6, true)?;

    let vertex_array = gi.create_vertex_array(PrimitiveTopology::TriangleList)?;
    gi.specify_vertex_attribute(vertex_array, positions, VertexAttribute::float(0, 0, 3))?;
    gi.specify_vertex_attribute(
        vertex_array,
        colors,
        VertexAttribute::new(1, 0, VertexDataType::UnsignedByte, 4).normalized(),
    )?;
    gi.specify_index_buffer(vertex_array, indices)?;

    Ok(Mesh {
        positions,
        colors,
        vertex_array,
    })
}

fn run_frames(gi: &GraphicsInterface, mesh: &Mesh, frames: u32) -> Result<(), GraphicsError> {
    for frame in 0..frames {
        // Pulse one corner and rotate the winding every 30 frames.
        let shade = (frame % 256) as u8;
        let corner = frame % 4;
        gi.update_elements(mesh.colors, Some(&[shade, 255 - shade, 128, 255]), corner, 1, true)?;
        if frame % 30 == 29 {
            gi.swap_elements(mesh.positions, 0, 2, 1)?;
        }
        gi.draw(mesh.vertex_array, 0, 0)?;
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    redlilium_pal::init();

    let params = InstanceParameters::from_env()
        .with_backend(args.backend.into())
        .with_wgpu_backend(args.gpu_api.into())
        .with_validation(args.validation);

    let mut dummy = None;
    let created = match params.backend {
        BackendType::Dummy => {
            let backend = Arc::new(DummyBackend::new());
            dummy = Some(backend.clone());
            Ok(GraphicsInterface::with_backend(backend, &params))
        }
        _ => GraphicsInterface::new(&params),
    };
    let mut gi = match created {
        Ok(gi) => gi,
        Err(e) => {
            log::error!("Failed to create graphics interface: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("Using {}", gi.backend().name());

    let result = build_mesh(&mut gi).and_then(|mesh| {
        run_frames(&gi, &mesh, args.frames)?;
        let count = gi.vertex_array_count(mesh.vertex_array)?;
        log::info!("Drew {} frames over {} vertices", args.frames, count);
        Ok(())
    });
    if let Err(e) = result {
        log::error!("Smoke run failed: {}", e);
        std::process::exit(1);
    }

    if let Some(dummy) = dummy {
        let stats = dummy.stats();
        println!("buffers created:    {}", stats.buffers_created);
        println!("buffer writes:      {}", stats.buffer_writes);
        println!("bytes written:      {}", stats.bytes_written);
        println!("vertex array binds: {}", stats.vertex_array_binds);
        println!("attribute binds:    {}", stats.attribute_binds);
        println!("draws:              {}", stats.draws);
    }

    gi.shutdown();
}
