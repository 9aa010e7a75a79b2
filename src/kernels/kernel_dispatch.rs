//! Compute backend — device acquisition and per-column kernel dispatch.
//!
//! Two device types are available:
//!   CPU         → columns run sequentially on the calling thread.
//!   Accelerator → columns run data-parallel on a dedicated rayon pool.
//!
//! Every kernel computes each column from read-only inputs and writes only
//! that column's slice of the target, so both devices produce bit-identical
//! results for the same inputs.

use ndarray::{Array, ArrayViewMut, Axis, Dimension, RemoveAxis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::MAX_LOCAL_ROWS;
use crate::error::DeviceError;

/// Device selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Cpu,
    Accelerator,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "CPU"),
            DeviceType::Accelerator => write!(f, "Accelerator"),
        }
    }
}

impl DeviceType {
    /// Pick the accelerator when more than one hardware thread is available.
    pub fn detect() -> Self {
        match std::thread::available_parallelism() {
            Ok(n) if n.get() > 1 => DeviceType::Accelerator,
            _ => DeviceType::Cpu,
        }
    }
}

/// An acquired compute device.
///
/// The accelerator's worker pool is owned here and released when the system
/// is dropped.
pub struct ComputeSystem {
    device: DeviceType,
    pool: Option<rayon::ThreadPool>,
}

impl ComputeSystem {
    /// Acquire a device; the accelerator gets one worker per hardware thread.
    pub fn create(device: DeviceType) -> Result<Self, DeviceError> {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_threads(device, threads)
    }

    /// Acquire a device with an explicit accelerator worker count.
    ///
    /// The count is ignored for the CPU device, which never fails.
    pub fn with_threads(device: DeviceType, threads: usize) -> Result<Self, DeviceError> {
        let pool = match device {
            DeviceType::Cpu => None,
            DeviceType::Accelerator => {
                if threads == 0 {
                    return Err(DeviceError::DeviceUnavailable(
                        "accelerator requested with zero workers".to_string(),
                    ));
                }
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("accel-{i}"))
                    .build()
                    .map_err(|e| DeviceError::DeviceUnavailable(e.to_string()))?;
                Some(pool)
            }
        };
        tracing::debug!("acquired {} compute system", device);
        Ok(Self { device, pool })
    }

    pub fn device(&self) -> DeviceType {
        self.device
    }

    /// Number of workers executing kernels.
    pub fn workers(&self) -> usize {
        self.pool
            .as_ref()
            .map(|p| p.current_num_threads())
            .unwrap_or(1)
    }

    /// Run `kernel` once per `(x, y)` column of `target`.
    ///
    /// `target` is laid out `[y, x, ...]`; the kernel receives the column's
    /// mutable sub-view (an `Array3` target yields a 1D lane, an `Array4`
    /// target a 2D block).
    pub fn for_each_column<D, F>(
        &self,
        program: &ComputeProgram,
        target: &mut Array<f32, D>,
        kernel: F,
    ) where
        D: Dimension + RemoveAxis,
        D::Smaller: RemoveAxis,
        F: Fn(usize, usize, ArrayViewMut<'_, f32, <D::Smaller as Dimension>::Smaller>)
            + Sync
            + Send,
    {
        match &self.pool {
            None => {
                for (y, mut row) in target.axis_iter_mut(Axis(0)).enumerate() {
                    for (x, cell) in row.axis_iter_mut(Axis(0)).enumerate() {
                        kernel(x, y, cell);
                    }
                }
            }
            Some(pool) => pool.install(|| {
                target
                    .axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .with_min_len(program.local_rows)
                    .enumerate()
                    .for_each(|(y, mut row)| {
                        for (x, cell) in row.axis_iter_mut(Axis(0)).enumerate() {
                            kernel(x, y, cell);
                        }
                    });
            }),
        }
    }
}

impl Drop for ComputeSystem {
    fn drop(&mut self) {
        tracing::debug!("releasing {} compute system", self.device);
    }
}

impl std::fmt::Debug for ComputeSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeSystem")
            .field("device", &self.device)
            .field("workers", &self.workers())
            .finish()
    }
}

/// Launch configuration validated against a device.
///
/// `local_rows` is the minimum number of grid rows a single accelerator
/// task processes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComputeProgram {
    local_rows: usize,
}

impl ComputeProgram {
    pub fn build(system: &ComputeSystem, local_rows: usize) -> Result<Self, DeviceError> {
        match system.device() {
            DeviceType::Cpu => Ok(Self {
                local_rows: local_rows.max(1),
            }),
            DeviceType::Accelerator => {
                if local_rows == 0 || local_rows > MAX_LOCAL_ROWS {
                    return Err(DeviceError::KernelCompilationError(format!(
                        "local work size {local_rows} outside 1..={MAX_LOCAL_ROWS}"
                    )));
                }
                Ok(Self { local_rows })
            }
        }
    }

    pub fn local_rows(&self) -> usize {
        self.local_rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    fn fill_kernel(x: usize, y: usize, mut col: ArrayViewMut<'_, f32, ndarray::Ix1>) {
        for (z, v) in col.iter_mut().enumerate() {
            *v = ((x * 31 + y * 7 + z) as f32).sin() * 0.5;
        }
    }

    #[test]
    fn test_cpu_visits_every_column() {
        let cs = ComputeSystem::create(DeviceType::Cpu).unwrap();
        let prog = ComputeProgram::build(&cs, 1).unwrap();
        let mut target = Array3::<f32>::zeros((3, 5, 2));
        cs.for_each_column(&prog, &mut target, |x, y, mut col| {
            col[0] = x as f32;
            col[1] = y as f32;
        });
        assert_eq!(target[[2, 4, 0]], 4.0);
        assert_eq!(target[[2, 4, 1]], 2.0);
        assert_eq!(target[[0, 1, 0]], 1.0);
    }

    #[test]
    fn test_accelerator_matches_cpu() {
        let cpu = ComputeSystem::create(DeviceType::Cpu).unwrap();
        let acc = ComputeSystem::with_threads(DeviceType::Accelerator, 4).unwrap();
        let cpu_prog = ComputeProgram::build(&cpu, 1).unwrap();
        let acc_prog = ComputeProgram::build(&acc, 2).unwrap();

        let mut a = Array3::<f32>::zeros((17, 9, 3));
        let mut b = a.clone();
        cpu.for_each_column(&cpu_prog, &mut a, fill_kernel);
        acc.for_each_column(&acc_prog, &mut b, fill_kernel);
        assert_eq!(a, b);
    }

    #[test]
    fn test_block_targets() {
        let acc = ComputeSystem::with_threads(DeviceType::Accelerator, 2).unwrap();
        let prog = ComputeProgram::build(&acc, 1).unwrap();
        let mut w = Array4::<f32>::zeros((4, 3, 2, 5));
        acc.for_each_column(&prog, &mut w, |x, y, mut block| {
            assert_eq!(block.dim(), (2, 5));
            block.fill((x + 10 * y) as f32);
        });
        assert_eq!(w[[3, 2, 1, 4]], 32.0);
    }

    #[test]
    fn test_program_validation() {
        let cpu = ComputeSystem::create(DeviceType::Cpu).unwrap();
        assert!(ComputeProgram::build(&cpu, 0).is_ok());
        assert!(ComputeProgram::build(&cpu, MAX_LOCAL_ROWS + 1).is_ok());

        let acc = ComputeSystem::with_threads(DeviceType::Accelerator, 2).unwrap();
        assert!(matches!(
            ComputeProgram::build(&acc, 0),
            Err(DeviceError::KernelCompilationError(_))
        ));
        assert!(matches!(
            ComputeProgram::build(&acc, MAX_LOCAL_ROWS + 1),
            Err(DeviceError::KernelCompilationError(_))
        ));
    }

    #[test]
    fn test_zero_workers_unavailable() {
        assert!(matches!(
            ComputeSystem::with_threads(DeviceType::Accelerator, 0),
            Err(DeviceError::DeviceUnavailable(_))
        ));
        assert!(ComputeSystem::with_threads(DeviceType::Cpu, 0).is_ok());
    }

    #[test]
    fn test_device_display() {
        assert_eq!(DeviceType::Cpu.to_string(), "CPU");
        assert_eq!(DeviceType::Accelerator.to_string(), "Accelerator");
    }
}
