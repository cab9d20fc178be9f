//! CUDA execution harness over cudarc (NVRTC + driver API).
//!
//! Compiles emitted CUDA source to PTX at runtime, loads it once per
//! module name, marshals parameters (results first, then inputs), and
//! launches with timing around the synchronize.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use cudarc::driver::{CudaDevice, DevicePtr, DeviceRepr, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::Ptx;

use super::{HostArg, HostBuffer, LaunchDims, LaunchStats, ParamPlan, RuntimeError};

pub struct CudaExecutor {
    device: Arc<CudaDevice>,
    loaded: HashSet<String>,
}

/// One marshaled kernel parameter. Buffers keep their device pointer
/// inline so the launch can take its address.
enum DeviceParam {
    Scalar32(u32),
    Scalar64(u64),
    Buffer {
        dptr: cudarc::driver::sys::CUdeviceptr,
        slice: cudarc::driver::CudaSlice<u8>,
    },
}

unsafe impl DeviceRepr for &DeviceParam {
    fn as_kernel_param(&self) -> *mut std::ffi::c_void {
        match self {
            DeviceParam::Scalar32(v) => v as *const u32 as *mut _,
            DeviceParam::Scalar64(v) => v as *const u64 as *mut _,
            DeviceParam::Buffer { dptr, .. } => {
                dptr as *const cudarc::driver::sys::CUdeviceptr as *mut _
            }
        }
    }
}

impl CudaExecutor {
    pub fn new() -> Result<Self, RuntimeError> {
        let device = CudaDevice::new(0).map_err(|e| RuntimeError::DriverInit(format!("{:?}", e)))?;
        Ok(Self { device, loaded: HashSet::new() })
    }

    /// Compile CUDA source to PTX. NVRTC's log is surfaced verbatim on
    /// failure; there is no partial execution.
    pub fn compile(&self, name: &str, source: &str) -> Result<Ptx, RuntimeError> {
        let start = Instant::now();
        let ptx = cudarc::nvrtc::compile_ptx(source)
            .map_err(|e| RuntimeError::Compile { log: format!("{} kernel: {:?}", name, e) })?;
        tracing::info!("compiled {} to PTX in {:?}", name, start.elapsed());
        Ok(ptx)
    }

    /// Load compiled PTX under `module`. Idempotent: a module that is
    /// already resident is not reloaded.
    pub fn load(
        &mut self,
        module: &str,
        ptx: Ptx,
        kernels: &[&str],
    ) -> Result<(), RuntimeError> {
        if self.loaded.contains(module) {
            return Ok(());
        }
        let module_name: &'static str = Box::leak(module.to_string().into_boxed_str());
        let names: Vec<&'static str> = kernels
            .iter()
            .map(|k| &*Box::leak(k.to_string().into_boxed_str()))
            .collect();
        self.device
            .load_ptx(ptx, module_name, &names)
            .map_err(|e| RuntimeError::ModuleLoad(format!("{:?}", e)))?;
        self.loaded.insert(module.to_string());
        tracing::info!("loaded module {} ({} kernels)", module, kernels.len());
        Ok(())
    }

    /// Launch `kernel`, synchronize, and copy every result argument back
    /// into its host storage. Device allocations are owned by this call
    /// and freed before it returns.
    pub fn execute(
        &self,
        module: &str,
        kernel: &str,
        results: &mut [HostBuffer],
        inputs: &[HostArg],
        dims: Option<LaunchDims>,
    ) -> Result<LaunchStats, RuntimeError> {
        let func = self
            .device
            .get_func(module, kernel)
            .ok_or_else(|| RuntimeError::MissingKernel(kernel.to_string()))?;
        let dims = dims.unwrap_or_default();

        let plan = super::plan_parameters(results, inputs);
        let mut params = Vec::with_capacity(plan.len());
        for p in &plan {
            let param = match p {
                ParamPlan::DeviceOut { index, .. } => {
                    let slice = self
                        .device
                        .htod_sync_copy(results[*index].bytes)
                        .map_err(|e| RuntimeError::MemoryAllocation(format!("{:?}", e)))?;
                    let dptr = *slice.device_ptr();
                    DeviceParam::Buffer { dptr, slice }
                }
                ParamPlan::DeviceIn { index, .. } => {
                    let bytes = match &inputs[*index] {
                        HostArg::Bytes(b) => *b,
                        _ => unreachable!("plan marks only byte args device-resident"),
                    };
                    let slice = self
                        .device
                        .htod_sync_copy(bytes)
                        .map_err(|e| RuntimeError::MemoryAllocation(format!("{:?}", e)))?;
                    let dptr = *slice.device_ptr();
                    DeviceParam::Buffer { dptr, slice }
                }
                ParamPlan::Scalar32(v) => DeviceParam::Scalar32(*v),
                ParamPlan::Scalar64(v) => DeviceParam::Scalar64(*v),
            };
            params.push(param);
        }

        let cfg = LaunchConfig {
            grid_dim: dims.grid,
            block_dim: dims.block,
            shared_mem_bytes: dims.shared_mem_bytes,
        };

        let start = Instant::now();
        launch_with_arity(func, cfg, &params)?;
        self.device
            .synchronize()
            .map_err(|e| RuntimeError::Launch(format!("synchronize: {:?}", e)))?;
        let elapsed = start.elapsed();
        tracing::info!("{}.{} executed in {:?}", module, kernel, elapsed);

        // Copy back the result set only — input buffers stay on device
        // until they are freed below.
        for (plan_entry, param) in plan.iter().zip(&params) {
            if let (ParamPlan::DeviceOut { index, .. }, DeviceParam::Buffer { slice, .. }) =
                (plan_entry, param)
            {
                self.device
                    .dtoh_sync_copy_into(slice, results[*index].bytes)
                    .map_err(|e| RuntimeError::MemoryTransfer(format!("{:?}", e)))?;
            }
        }

        // Dropping `params` releases every device allocation made above.
        Ok(LaunchStats { elapsed })
    }
}

fn launch_with_arity(
    func: cudarc::driver::CudaFunction,
    cfg: LaunchConfig,
    p: &[DeviceParam],
) -> Result<(), RuntimeError> {
    let err = |e| RuntimeError::Launch(format!("{:?}", e));
    unsafe {
        match p {
            [a] => func.launch(cfg, (a,)).map_err(err),
            [a, b] => func.launch(cfg, (a, b)).map_err(err),
            [a, b, c] => func.launch(cfg, (a, b, c)).map_err(err),
            [a, b, c, d] => func.launch(cfg, (a, b, c, d)).map_err(err),
            [a, b, c, d, e] => func.launch(cfg, (a, b, c, d, e)).map_err(err),
            [a, b, c, d, e, f] => func.launch(cfg, (a, b, c, d, e, f)).map_err(err),
            [a, b, c, d, e, f, g] => func.launch(cfg, (a, b, c, d, e, f, g)).map_err(err),
            [a, b, c, d, e, f, g, h] => func.launch(cfg, (a, b, c, d, e, f, g, h)).map_err(err),
            [a, b, c, d, e, f, g, h, i] => {
                func.launch(cfg, (a, b, c, d, e, f, g, h, i)).map_err(err)
            }
            [a, b, c, d, e, f, g, h, i, j] => {
                func.launch(cfg, (a, b, c, d, e, f, g, h, i, j)).map_err(err)
            }
            [a, b, c, d, e, f, g, h, i, j, k] => {
                func.launch(cfg, (a, b, c, d, e, f, g, h, i, j, k)).map_err(err)
            }
            [a, b, c, d, e, f, g, h, i, j, k, l] => {
                func.launch(cfg, (a, b, c, d, e, f, g, h, i, j, k, l)).map_err(err)
            }
            [] => Err(RuntimeError::Launch("kernel takes no parameters".into())),
            _ => Err(RuntimeError::Launch(format!(
                "too many kernel parameters ({}, max 12)",
                p.len()
            ))),
        }
    }
}
