//! Layer capability interface
//!
//! The compression session never touches a concrete layer type. Anything
//! that can hand out its weight as a 2-D matrix, accept an in-place weight
//! replacement and persist quantization parameters is compressible. Device
//! residency is part of the contract so hosts that park weights off the
//! compute device can stage them in around the commit.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::config::QuantizationArgs;
use super::error::{GptqError, Result};

/// Compute-device residency tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Device {
    #[default]
    Cpu,
    Accelerator(usize),
}

/// Quantization parameters persisted on a layer after compression
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuantizedLayerParams {
    /// Scales, row-major over `[rows, num_groups]` (`[1, 1]` for Tensor)
    pub scales: Vec<f32>,
    /// Zero points, same layout as `scales`
    pub zero_points: Vec<i32>,
    /// Number of parameter rows
    pub rows: usize,
    /// Number of parameter groups per row
    pub num_groups: usize,
    /// Bit width of the grid the weight was quantized onto
    pub bits: u8,
    /// Column-to-group map; present only when it is not the identity
    pub g_idx: Option<Vec<u32>>,
}

impl QuantizedLayerParams {
    /// Bytes occupied by the persisted parameters
    pub fn param_bytes(&self) -> usize {
        self.scales.len() * 4
            + self.zero_points.len() * 4
            + self.g_idx.as_ref().map_or(0, |g| g.len() * 4)
    }
}

/// Capability set a layer must provide to be compressible
pub trait CompressibleLayer {
    /// Original shape of the weight tensor
    fn weight_shape(&self) -> Vec<usize>;

    /// Weight as an owned `[rows, columns]` matrix (rows = output features)
    fn weight_matrix(&self) -> Array2<f32>;

    /// Copy `w` into the layer's existing weight buffer
    ///
    /// Must mutate the buffer in place; swapping in a fresh tensor breaks
    /// hosts that shard or alias the parameter storage.
    fn replace_weight(&mut self, w: &Array2<f32>) -> Result<()>;

    /// Quantization configuration, if the layer is to be quantized at all
    fn quantization_args(&self) -> Option<&QuantizationArgs>;

    /// Persist final scale/zero-point (and group index map)
    fn set_quantization_params(&mut self, params: QuantizedLayerParams);

    /// Device the weight currently resides on
    fn device(&self) -> Device {
        Device::Cpu
    }

    /// Device the weight rests on between uses
    fn resting_device(&self) -> Device {
        self.device()
    }

    /// Stage the weight onto the given compute device
    fn stage_on_device(&mut self, _device: Device) {}

    /// Return the weight to its resting device
    fn restore_device(&mut self) {}

    /// Bytes occupied by the full-precision weight
    fn weight_size_bytes(&self) -> usize;
}

/// Dense layer with a `[rows, columns]` weight matrix
#[derive(Clone, Debug)]
pub struct LinearLayer {
    weight: Array2<f32>,
    args: Option<QuantizationArgs>,
    params: Option<QuantizedLayerParams>,
    device: Device,
    resting_device: Device,
}

impl LinearLayer {
    /// Create a layer from its weight matrix
    pub fn new(weight: Array2<f32>) -> Self {
        Self {
            weight,
            args: None,
            params: None,
            device: Device::Cpu,
            resting_device: Device::Cpu,
        }
    }

    /// Attach quantization arguments
    pub fn with_quantization(mut self, args: QuantizationArgs) -> Self {
        self.args = Some(args);
        self
    }

    /// Park the weight on `device` between uses
    pub fn with_resting_device(mut self, device: Device) -> Self {
        self.resting_device = device;
        self.device = device;
        self
    }

    /// Current weight
    pub fn weight(&self) -> ArrayView2<f32> {
        self.weight.view()
    }

    /// Persisted quantization parameters, if compressed
    pub fn quantization_params(&self) -> Option<&QuantizedLayerParams> {
        self.params.as_ref()
    }
}

impl CompressibleLayer for LinearLayer {
    fn weight_shape(&self) -> Vec<usize> {
        self.weight.shape().to_vec()
    }

    fn weight_matrix(&self) -> Array2<f32> {
        self.weight.clone()
    }

    fn replace_weight(&mut self, w: &Array2<f32>) -> Result<()> {
        if w.dim() != self.weight.dim() {
            return Err(GptqError::ShapeMismatch {
                expected: self.weight.shape().to_vec(),
                got: w.shape().to_vec(),
            });
        }
        self.weight.assign(w);
        Ok(())
    }

    fn quantization_args(&self) -> Option<&QuantizationArgs> {
        self.args.as_ref()
    }

    fn set_quantization_params(&mut self, params: QuantizedLayerParams) {
        self.params = Some(params);
    }

    fn device(&self) -> Device {
        self.device
    }

    fn resting_device(&self) -> Device {
        self.resting_device
    }

    fn stage_on_device(&mut self, device: Device) {
        self.device = device;
    }

    fn restore_device(&mut self) {
        self.device = self.resting_device;
    }

    fn weight_size_bytes(&self) -> usize {
        self.weight.len() * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gptq::config::QuantizationScheme;
    use ndarray::array;

    #[test]
    fn test_replace_weight_in_place() {
        let mut layer = LinearLayer::new(array![[1.0, 2.0], [3.0, 4.0]]);
        let new_w = array![[0.5, 0.5], [0.5, 0.5]];
        layer.replace_weight(&new_w).unwrap();
        assert_eq!(layer.weight(), new_w.view());
    }

    #[test]
    fn test_replace_weight_shape_checked() {
        let mut layer = LinearLayer::new(array![[1.0, 2.0]]);
        let bad = array![[1.0], [2.0]];
        assert!(layer.replace_weight(&bad).is_err());
    }

    #[test]
    fn test_device_staging_roundtrip() {
        let mut layer = LinearLayer::new(array![[1.0]])
            .with_resting_device(Device::Accelerator(1));
        assert_eq!(layer.device(), Device::Accelerator(1));

        layer.stage_on_device(Device::Cpu);
        assert_eq!(layer.device(), Device::Cpu);

        layer.restore_device();
        assert_eq!(layer.device(), Device::Accelerator(1));
    }

    #[test]
    fn test_unconfigured_layer_has_no_args() {
        let layer = LinearLayer::new(array![[1.0]]);
        assert!(layer.quantization_args().is_none());

        let layer = layer.with_quantization(QuantizationArgs::tensor(
            QuantizationScheme::symmetric(4),
        ));
        assert!(layer.quantization_args().is_some());
    }

    #[test]
    fn test_param_bytes() {
        let params = QuantizedLayerParams {
            scales: vec![1.0; 8],
            zero_points: vec![0; 8],
            rows: 4,
            num_groups: 2,
            bits: 4,
            g_idx: Some(vec![0, 0, 1, 1]),
        };
        assert_eq!(params.param_bytes(), 8 * 4 + 8 * 4 + 4 * 4);
    }
}
