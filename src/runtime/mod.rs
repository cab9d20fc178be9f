//! Kernel execution harnesses.
//!
//! Each invocation walks the same state machine:
//!
//! ```text
//! Uncompiled → Compiled → ModuleLoaded → Executing → Synchronized
//! ```
//!
//! Launches are asynchronous; results are valid only after the harness
//! synchronizes. Device memory is owned by the in-flight invocation —
//! allocated on entry, freed on exit, never pooled across calls.
//!
//! Parameter order is a hard contract: all result arguments first, in the
//! order given, then all input arguments, in the order given. This must
//! match the kernel's declared parameter order exactly.

#[cfg(feature = "cuda")]
pub mod cuda;
pub mod wgpu;

use std::time::Duration;

use thiserror::Error;

// ─── Errors ───────────────────────────────────────────────────────

/// Driver and runtime failures. All are fatal for the invocation; the
/// underlying compiler/driver log is surfaced verbatim.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no GPU device available")]
    NoDevice,
    #[error("driver initialization failed: {0}")]
    DriverInit(String),
    #[error("kernel compilation failed:\n{log}")]
    Compile { log: String },
    #[error("module load failed: {0}")]
    ModuleLoad(String),
    #[error("kernel function `{0}` not found in module")]
    MissingKernel(String),
    #[error("memory allocation failed: {0}")]
    MemoryAllocation(String),
    #[error("memory transfer failed: {0}")]
    MemoryTransfer(String),
    #[error("size mismatch for `{name}`: host {host} bytes, device {device} bytes")]
    SizeMismatch {
        name: String,
        host: usize,
        device: usize,
    },
    #[error("kernel launch failed: {0}")]
    Launch(String),
}

// ─── Invocation surface ───────────────────────────────────────────

/// Grid/block geometry for one launch. The default is the convenience
/// configuration: one block of a small fixed thread count.
#[derive(Clone, Copy, Debug)]
pub struct LaunchDims {
    pub grid: (u32, u32, u32),
    pub block: (u32, u32, u32),
    pub shared_mem_bytes: u32,
}

impl Default for LaunchDims {
    fn default() -> Self {
        Self {
            grid: (1, 1, 1),
            block: (64, 1, 1),
            shared_mem_bytes: 0,
        }
    }
}

/// An input argument. Aggregates are device-copied; trivial scalars are
/// passed by address directly with no device allocation.
pub enum HostArg<'a> {
    Scalar32(u32),
    Scalar64(u64),
    Bytes(&'a [u8]),
}

impl<'a> HostArg<'a> {
    pub fn words32(words: &'a [u32]) -> Self {
        HostArg::Bytes(bytemuck::cast_slice(words))
    }

    pub fn words64(words: &'a [u64]) -> Self {
        HostArg::Bytes(bytemuck::cast_slice(words))
    }
}

/// A result argument: host storage the kernel's output is copied back
/// into after synchronization.
pub struct HostBuffer<'a> {
    pub bytes: &'a mut [u8],
}

impl<'a> HostBuffer<'a> {
    pub fn words32(words: &'a mut [u32]) -> Self {
        HostBuffer { bytes: bytemuck::cast_slice_mut(words) }
    }

    pub fn words64(words: &'a mut [u64]) -> Self {
        HostBuffer { bytes: bytemuck::cast_slice_mut(words) }
    }
}

/// Timing report for one synchronized launch.
#[derive(Clone, Copy, Debug)]
pub struct LaunchStats {
    pub elapsed: Duration,
}

// ─── Marshaling plan ──────────────────────────────────────────────

/// One kernel parameter, in final launch order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamPlan {
    /// Device allocation copied host→device before launch and
    /// device→host after synchronize. `index` is into the result set.
    DeviceOut { index: usize, size: usize },
    /// Device allocation copied host→device only. `index` is into the
    /// input set.
    DeviceIn { index: usize, size: usize },
    Scalar32(u32),
    Scalar64(u64),
}

/// Compute the marshaling plan: results first in given order, then
/// inputs in given order. Sizes are element-count-aware — they come from
/// the host slices, never from pointer widths.
pub fn plan_parameters(results: &[HostBuffer], inputs: &[HostArg]) -> Vec<ParamPlan> {
    let mut plan = Vec::with_capacity(results.len() + inputs.len());
    for (index, r) in results.iter().enumerate() {
        plan.push(ParamPlan::DeviceOut { index, size: r.bytes.len() });
    }
    for (index, arg) in inputs.iter().enumerate() {
        match arg {
            HostArg::Bytes(b) => plan.push(ParamPlan::DeviceIn { index, size: b.len() }),
            HostArg::Scalar32(v) => plan.push(ParamPlan::Scalar32(*v)),
            HostArg::Scalar64(v) => plan.push(ParamPlan::Scalar64(*v)),
        }
    }
    plan
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_precede_inputs_in_declaration_order() {
        let mut r = [0u32; 8];
        let a = [1u32; 8];
        let b = [2u32; 8];
        let results = [HostBuffer::words32(&mut r)];
        let inputs = [HostArg::words32(&a), HostArg::words32(&b)];
        let plan = plan_parameters(&results, &inputs);
        assert_eq!(
            plan,
            vec![
                ParamPlan::DeviceOut { index: 0, size: 32 },
                ParamPlan::DeviceIn { index: 0, size: 32 },
                ParamPlan::DeviceIn { index: 1, size: 32 },
            ]
        );
    }

    #[test]
    fn only_result_args_are_copied_back() {
        let mut r = [0u64; 4];
        let a = [0u64; 4];
        let results = [HostBuffer::words64(&mut r)];
        let inputs = [HostArg::words64(&a), HostArg::Scalar32(3)];
        let plan = plan_parameters(&results, &inputs);
        let out_count = plan
            .iter()
            .filter(|p| matches!(p, ParamPlan::DeviceOut { .. }))
            .count();
        assert_eq!(out_count, 1);
    }

    #[test]
    fn sizes_are_element_count_aware() {
        let data = vec![0u32; 1000];
        let inputs = [HostArg::words32(&data)];
        let plan = plan_parameters(&[], &inputs);
        assert_eq!(plan, vec![ParamPlan::DeviceIn { index: 0, size: 4000 }]);
    }

    #[test]
    fn scalars_take_no_device_allocation() {
        let plan = plan_parameters(&[], &[HostArg::Scalar64(7), HostArg::Scalar32(1)]);
        assert_eq!(plan, vec![ParamPlan::Scalar64(7), ParamPlan::Scalar32(1)]);
    }

    #[test]
    fn default_dims_are_single_block() {
        let dims = LaunchDims::default();
        assert_eq!(dims.grid, (1, 1, 1));
        assert_eq!(dims.block.0, 64);
        assert_eq!(dims.shared_mem_bytes, 0);
    }
}
