//! Quantization parameter observer
//!
//! Computes scale/zero-point parameters for a weight at the configured
//! granularity and exposes the simulated (fake) quantization mapping the
//! solver quantizes columns through. Re-observing an updated slice always
//! recomputes fresh parameters from the current content; nothing is
//! accumulated across observations.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};

use super::config::{QuantizationArgs, QuantizationStrategy};
use super::error::Result;
use super::layer::QuantizedLayerParams;

/// Smallest admissible scale, guarding division by zero on constant slices
const SCALE_FLOOR: f32 = 1e-8;

/// Scale/zero-point observer for one layer weight
#[derive(Clone, Debug)]
pub struct QuantObserver {
    args: QuantizationArgs,
    num_groups: usize,
    /// Scale per (row, group); `[1, 1]` for Tensor, `[rows, 1]` for Channel
    scale: Array2<f32>,
    /// Zero point per (row, group), same shape as `scale`
    zero_point: Array2<i32>,
}

impl QuantObserver {
    /// Create an observer for a `[rows, columns]` weight
    pub fn new(args: QuantizationArgs, rows: usize, columns: usize) -> Result<Self> {
        args.validate()?;
        let num_groups = args.num_groups(columns);
        let param_rows = match args.strategy {
            QuantizationStrategy::Tensor => 1,
            QuantizationStrategy::Channel | QuantizationStrategy::Group => rows,
        };
        Ok(Self {
            args,
            num_groups,
            scale: Array2::zeros((param_rows, num_groups)),
            zero_point: Array2::zeros((param_rows, num_groups)),
        })
    }

    /// Configured strategy
    pub fn strategy(&self) -> QuantizationStrategy {
        self.args.strategy
    }

    /// Compute and store parameters for the full weight
    ///
    /// For the Group strategy the column groups are taken as contiguous runs
    /// of `group_size` in the weight's current column order.
    pub fn observe(&mut self, w: ArrayView2<f32>) {
        match self.args.strategy {
            QuantizationStrategy::Tensor => {
                let (min_val, max_val) = min_max(w.iter().copied());
                let (scale, zp) = self.qparams_from_range(min_val, max_val);
                self.scale[[0, 0]] = scale;
                self.zero_point[[0, 0]] = zp;
            }
            QuantizationStrategy::Channel => {
                for (r, row) in w.rows().into_iter().enumerate() {
                    let (min_val, max_val) = min_max(row.iter().copied());
                    let (scale, zp) = self.qparams_from_range(min_val, max_val);
                    self.scale[[r, 0]] = scale;
                    self.zero_point[[r, 0]] = zp;
                }
            }
            QuantizationStrategy::Group => {
                let size = self.args.group_size.unwrap_or(w.ncols()).max(1);
                for g in 0..self.num_groups {
                    let start = g * size;
                    let end = (start + size).min(w.ncols());
                    self.update_group(g, w.slice(s![.., start..end]));
                }
            }
        }
    }

    /// Pure mapping from a value slice to (scale, zero-point)
    pub fn calculate_qparams(&self, values: ArrayView1<f32>) -> (f32, i32) {
        let (min_val, max_val) = min_max(values.iter().copied());
        self.qparams_from_range(min_val, max_val)
    }

    /// Recompute parameters from the current residual column (Channel
    /// strategy): one pair from the column's full range, shared by every row
    /// at this column position
    pub fn update_channel(&mut self, column: ArrayView1<f32>) {
        let (scale, zp) = self.calculate_qparams(column);
        self.scale.column_mut(0).fill(scale);
        self.zero_point.column_mut(0).fill(zp);
    }

    /// Recompute per-row parameters for one group from its current column
    /// slice (Group strategy)
    pub fn update_group(&mut self, group: usize, slice: ArrayView2<f32>) {
        for (r, row) in slice.rows().into_iter().enumerate() {
            let (min_val, max_val) = min_max(row.iter().copied());
            let (scale, zp) = self.qparams_from_range(min_val, max_val);
            self.scale[[r, group]] = scale;
            self.zero_point[[r, group]] = zp;
        }
    }

    /// Map a column through the integer grid and back (fake quantization)
    ///
    /// `group` selects the parameter column for the Group strategy and is
    /// ignored otherwise.
    pub fn quantize_dequantize(&self, column: ArrayView1<f32>, group: usize) -> Array1<f32> {
        let q_min = self.args.scheme.q_min();
        let q_max = self.args.scheme.q_max();
        Array1::from_iter(column.iter().enumerate().map(|(r, &v)| {
            let (scale, zp) = self.params_at(r, group);
            let q = (v / scale + zp).round().clamp(q_min, q_max);
            (q - zp) * scale
        }))
    }

    /// Export the parameters for persistence on the layer
    pub fn export_params(&self, g_idx: Option<Vec<u32>>) -> QuantizedLayerParams {
        QuantizedLayerParams {
            scales: self.scale.iter().copied().collect(),
            zero_points: self.zero_point.iter().copied().collect(),
            rows: self.scale.nrows(),
            num_groups: self.num_groups,
            bits: self.args.scheme.bits,
            g_idx,
        }
    }

    fn params_at(&self, row: usize, group: usize) -> (f32, f32) {
        match self.args.strategy {
            QuantizationStrategy::Tensor => {
                (self.scale[[0, 0]], self.zero_point[[0, 0]] as f32)
            }
            QuantizationStrategy::Channel => {
                (self.scale[[row, 0]], self.zero_point[[row, 0]] as f32)
            }
            QuantizationStrategy::Group => {
                (self.scale[[row, group]], self.zero_point[[row, group]] as f32)
            }
        }
    }

    fn qparams_from_range(&self, min_val: f32, max_val: f32) -> (f32, i32) {
        let scheme = self.args.scheme;
        if scheme.symmetric {
            let max_abs = min_val.abs().max(max_val.abs()).max(SCALE_FLOOR);
            (max_abs / scheme.q_max(), 0)
        } else {
            // range always includes zero so that zero stays representable
            let min_val = min_val.min(0.0);
            let max_val = max_val.max(0.0);
            let scale = (max_val - min_val).max(SCALE_FLOOR) / (scheme.q_max() - scheme.q_min());
            let zp = (-min_val / scale)
                .round()
                .clamp(scheme.q_min(), scheme.q_max()) as i32;
            (scale, zp)
        }
    }
}

fn min_max(values: impl Iterator<Item = f32>) -> (f32, f32) {
    values.fold((f32::MAX, f32::MIN), |(min, max), v| {
        (min.min(v), max.max(v))
    })
}
