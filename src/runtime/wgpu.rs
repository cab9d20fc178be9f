//! WGSL execution harness over wgpu.
//!
//! Compiles emitted WGSL at runtime, binds one storage buffer per kernel
//! parameter (results first, matching the generator's binding order),
//! dispatches, synchronizes, and reads results back through a staging
//! buffer.

use std::time::Instant;

use wgpu::util::DeviceExt;

use super::{HostArg, HostBuffer, LaunchDims, LaunchStats, RuntimeError};

pub struct WgpuExecutor {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

/// A compiled shader module ready for pipeline creation.
pub struct WgpuModule {
    module: wgpu::ShaderModule,
}

impl WgpuExecutor {
    /// Create a device and queue on the best available adapter.
    pub fn new() -> Result<Self, RuntimeError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(RuntimeError::NoDevice)?;
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("limbforge-gpu"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| RuntimeError::DriverInit(format!("{:?}", e)))?;
        Ok(Self { device, queue })
    }

    /// Compile WGSL source. Validation failures surface the compiler's
    /// error text verbatim and fail the invocation.
    pub fn compile(&self, source: &str) -> Result<WgpuModule, RuntimeError> {
        let start = Instant::now();
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("limbforge-kernel"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RuntimeError::Compile { log: err.to_string() });
        }
        tracing::info!("compiled WGSL module in {:?}", start.elapsed());
        Ok(WgpuModule { module })
    }

    /// Launch `entry` with the marshaled parameter list `[results...,
    /// inputs...]`, synchronize, and copy results back.
    pub fn execute(
        &self,
        module: &WgpuModule,
        entry: &str,
        results: &mut [HostBuffer],
        inputs: &[HostArg],
        dims: Option<LaunchDims>,
    ) -> Result<LaunchStats, RuntimeError> {
        let dims = dims.unwrap_or_default();

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: None,
                module: &module.module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            });
        if pollster::block_on(self.device.pop_error_scope()).is_some() {
            return Err(RuntimeError::MissingKernel(entry.to_string()));
        }

        // Storage buffers in parameter order: results first, then inputs.
        let mut buffers = Vec::new();
        let mut staging = Vec::new();
        for r in results.iter() {
            let buf = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("result"),
                    contents: r.bytes,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                });
            staging.push(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("staging"),
                size: r.bytes.len() as u64,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            buffers.push(buf);
        }
        for arg in inputs {
            let contents: Vec<u8> = match arg {
                HostArg::Bytes(b) => b.to_vec(),
                HostArg::Scalar32(v) => v.to_le_bytes().to_vec(),
                HostArg::Scalar64(v) => v.to_le_bytes().to_vec(),
            };
            buffers.push(self.device.create_buffer_init(
                &wgpu::util::BufferInitDescriptor {
                    label: Some("input"),
                    contents: &contents,
                    usage: wgpu::BufferUsages::STORAGE,
                },
            ));
        }

        let layout = pipeline.get_bind_group_layout(0);
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(i, buf)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buf.as_entire_binding(),
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(entry),
            layout: &layout,
            entries: &entries,
        });

        let start = Instant::now();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(entry) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(entry),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(dims.grid.0, dims.grid.1, dims.grid.2);
        }
        for (i, stage) in staging.iter().enumerate() {
            encoder.copy_buffer_to_buffer(&buffers[i], 0, stage, 0, stage.size());
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        // Synchronize, then copy back every result argument.
        for (r, stage) in results.iter_mut().zip(&staging) {
            let slice = stage.slice(..);
            let (tx, rx) = std::sync::mpsc::channel();
            slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
            self.device.poll(wgpu::Maintain::Wait);
            rx.recv()
                .map_err(|_| RuntimeError::MemoryTransfer("readback channel closed".into()))?
                .map_err(|e| RuntimeError::MemoryTransfer(format!("{:?}", e)))?;
            let data = slice.get_mapped_range();
            if data.len() != r.bytes.len() {
                return Err(RuntimeError::SizeMismatch {
                    name: entry.to_string(),
                    host: r.bytes.len(),
                    device: data.len(),
                });
            }
            r.bytes.copy_from_slice(&data);
            drop(data);
            stage.unmap();
        }
        let elapsed = start.elapsed();
        tracing::info!("{} executed in {:?}", entry, elapsed);

        Ok(LaunchStats { elapsed })
    }
}
