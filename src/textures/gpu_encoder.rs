//! BC7 compression on the GPU (wgpu compute shaders via block_compression)
//!
//! Encodes are queued into an [`EncodeBatch`] and run in a single compute
//! pass, so a texture's whole mip chain costs one submission.

use anyhow::{Context, Result};
use block_compression::{BC7Settings, CompressionVariant, GpuBlockCompressor};
use std::sync::Arc;
use tracing::{debug, info};
use wgpu::{
    Backends, Buffer, BufferDescriptor, BufferUsages, CommandEncoderDescriptor, Device, Extent3d,
    Instance, Queue, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
    TextureView, TextureViewDescriptor,
};

use super::transforms::is_block_aligned;

/// Adapter description for listing and selection
#[derive(Debug, Clone)]
pub struct GpuInfo {
    pub name: String,
    pub backend: String,
    pub device_type: String,
    pub adapter_index: usize,
}

impl GpuInfo {
    fn from_adapter(adapter: &wgpu::Adapter, adapter_index: usize) -> Self {
        let info = adapter.get_info();
        Self {
            name: info.name,
            backend: format!("{:?}", info.backend),
            device_type: format!("{:?}", info.device_type),
            adapter_index,
        }
    }
}

impl std::fmt::Display for GpuInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.backend, self.device_type)
    }
}

/// One uploaded level waiting for the compute pass
struct QueuedLevel {
    #[allow(dead_code)] // keeps the view's texture alive
    texture: Texture,
    view: TextureView,
    blocks: Buffer,
    readback: Buffer,
    size: u64,
    width: u32,
    height: u32,
}

/// Levels sharing one BC7 preset
pub struct EncodeBatch {
    levels: Vec<QueuedLevel>,
    settings: BC7Settings,
}

impl EncodeBatch {
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

fn instance() -> Instance {
    Instance::new(&wgpu::InstanceDescriptor {
        backends: Backends::VULKAN | Backends::DX12 | Backends::METAL,
        ..Default::default()
    })
}

/// Prefer discrete GPUs, then Vulkan
fn adapter_score(adapter: &wgpu::Adapter) -> i32 {
    let info = adapter.get_info();
    let mut score = 0;
    if info.device_type == wgpu::DeviceType::DiscreteGpu {
        score += 100;
    }
    if info.backend == wgpu::Backend::Vulkan {
        score += 10;
    }
    score
}

pub struct GpuEncoder {
    device: Arc<Device>,
    queue: Arc<Queue>,
    compressor: GpuBlockCompressor,
    gpu_info: GpuInfo,
}

impl GpuEncoder {
    /// Pick the best adapter
    pub fn new() -> Result<Self> {
        Self::with_gpu_index(None)
    }

    /// Use adapter `gpu_index` as numbered by [`list_gpus`], or the best one
    pub fn with_gpu_index(gpu_index: Option<usize>) -> Result<Self> {
        pollster::block_on(Self::new_async(gpu_index))
    }

    async fn new_async(gpu_index: Option<usize>) -> Result<Self> {
        let adapters = instance().enumerate_adapters(Backends::all()).await;

        let (adapter_index, adapter) = match gpu_index {
            Some(idx) => {
                let adapter = adapters.get(idx).with_context(|| {
                    format!("GPU index {} out of range (found {} GPUs)", idx, adapters.len())
                })?;
                (idx, adapter)
            }
            None => adapters
                .iter()
                .enumerate()
                .max_by_key(|(_, a)| adapter_score(a))
                .context("No GPU found on this system")?,
        };

        let gpu_info = GpuInfo::from_adapter(adapter, adapter_index);
        info!("Selected GPU {}: {}", adapter_index, gpu_info);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("texpolicy BC7 encoder"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .context("Failed to create GPU device")?;

        let device = Arc::new(device);
        let queue = Arc::new(queue);
        let compressor = GpuBlockCompressor::new((*device).clone(), (*queue).clone());

        Ok(Self {
            device,
            queue,
            compressor,
            gpu_info,
        })
    }

    pub fn info(&self) -> &GpuInfo {
        &self.gpu_info
    }

    /// Start a batch encoded with `settings`
    pub fn create_batch(&self, settings: BC7Settings) -> EncodeBatch {
        EncodeBatch {
            levels: Vec::new(),
            settings,
        }
    }

    fn upload(&self, rgba: &[u8], width: u32, height: u32) -> (Texture, TextureView) {
        let extent = Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some("BC7 source level"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            extent,
        );

        let view = texture.create_view(&TextureViewDescriptor::default());
        (texture, view)
    }

    /// Upload one level into the batch. Returns its index in the flush output.
    pub fn queue_bc7(
        &self,
        batch: &mut EncodeBatch,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> Result<usize> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            anyhow::bail!(
                "RGBA level is {} bytes, {}x{} needs {}",
                rgba.len(),
                width,
                height,
                expected
            );
        }
        if width == 0 || height == 0 || !is_block_aligned(width, height) {
            anyhow::bail!("BC7 level {}x{} is not made of 4x4 blocks", width, height);
        }

        debug!("Queuing BC7 level {}x{}", width, height);

        let (texture, view) = self.upload(rgba, width, height);
        let size = CompressionVariant::BC7(batch.settings).blocks_byte_size(width, height) as u64;

        let blocks = self.device.create_buffer(&BufferDescriptor {
            label: Some("BC7 blocks"),
            size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = self.device.create_buffer(&BufferDescriptor {
            label: Some("BC7 readback"),
            size,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        batch.levels.push(QueuedLevel {
            texture,
            view,
            blocks,
            readback,
            size,
            width,
            height,
        });
        Ok(batch.levels.len() - 1)
    }

    /// Compress every queued level and read the blocks back, in queue order
    pub fn flush_batch(&mut self, batch: EncodeBatch) -> Result<Vec<Vec<u8>>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Flushing {} BC7 levels", batch.len());

        let variant = CompressionVariant::BC7(batch.settings);
        for level in &batch.levels {
            self.compressor.add_compression_task(
                variant,
                &level.view,
                level.width,
                level.height,
                &level.blocks,
                None,
                None,
            );
        }

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("BC7 batch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("BC7 batch pass"),
                timestamp_writes: None,
            });
            self.compressor.compress(&mut pass);
        }
        for level in &batch.levels {
            encoder.copy_buffer_to_buffer(&level.blocks, 0, &level.readback, 0, level.size);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        let pending: Vec<_> = batch
            .levels
            .iter()
            .map(|level| {
                let (tx, rx) = std::sync::mpsc::channel();
                level
                    .readback
                    .slice(..)
                    .map_async(wgpu::MapMode::Read, move |result| {
                        let _ = tx.send(result);
                    });
                rx
            })
            .collect();

        let _ = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        });

        let mut out = Vec::with_capacity(batch.len());
        for (level, rx) in batch.levels.iter().zip(pending) {
            rx.recv()
                .context("GPU readback channel closed")?
                .context("Failed to map BC7 readback buffer")?;

            let mapped = level.readback.slice(..).get_mapped_range();
            out.push(mapped.to_vec());
            drop(mapped);
            level.readback.unmap();
        }

        Ok(out)
    }
}

/// Every adapter wgpu can see, numbered for `--gpu-index`
pub fn list_gpus() -> Vec<GpuInfo> {
    pollster::block_on(async {
        instance()
            .enumerate_adapters(Backends::all())
            .await
            .iter()
            .enumerate()
            .map(|(idx, adapter)| GpuInfo::from_adapter(adapter, idx))
            .collect()
    })
}
