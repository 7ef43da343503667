//! Layer compression session
//!
//! Owns the running Hessian and the weight for one layer across the
//! accumulate → compress → release lifecycle. Exactly one `compress` call is
//! permitted; the session must not be reused after `free`.

use ndarray::{Array2, ArrayViewD};
use std::time::Instant;

use super::actorder::{activation_order, invert_permutation, permute_columns, permute_hessian, permute_indices};
use super::config::{
    ActivationOrdering, GptqConfig, QuantizationArgs, QuantizationStrategy, SPARSITY_THRESHOLD,
};
use super::error::{GptqError, Result};
use super::hessian::HessianAccumulator;
use super::layer::{CompressibleLayer, Device};
use super::observer::QuantObserver;
use super::report::{CompressionMetrics, CompressionReporter, NoopReporter};
use super::solver::{nonzero_mask, quantize_blockwise, tensor_sparsity};

/// Session lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting calibration batches; no compression yet
    Accumulating,
    /// Compression has run (or was skipped); only `free` may follow
    Compressed,
    /// Compression failed after the Hessian was consumed; only `free` is
    /// valid
    Failed,
    /// Hessian released; the session must not be used again
    Released,
}

impl SessionState {
    fn as_str(self) -> &'static str {
        match self {
            SessionState::Accumulating => "Accumulating",
            SessionState::Compressed => "Compressed",
            SessionState::Failed => "Failed",
            SessionState::Released => "Released",
        }
    }
}

/// One layer's compression lifecycle: accumulate, compress, free
pub struct LayerCompressionSession {
    name: String,
    columns: usize,
    compute_device: Device,
    state: SessionState,
    hessian: Option<HessianAccumulator>,
    reporter: Box<dyn CompressionReporter>,
}

impl LayerCompressionSession {
    /// Create a session for a layer with `columns` input features
    pub fn new(name: impl Into<String>, columns: usize) -> Self {
        Self {
            name: name.into(),
            columns,
            compute_device: Device::Cpu,
            state: SessionState::Accumulating,
            hessian: Some(HessianAccumulator::new(columns)),
            reporter: Box::new(NoopReporter),
        }
    }

    /// Attach a metrics reporter
    pub fn with_reporter(mut self, reporter: Box<dyn CompressionReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Set the device compression runs on
    pub fn with_compute_device(mut self, device: Device) -> Self {
        self.compute_device = device;
        self
    }

    /// Layer name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Samples accumulated so far
    pub fn n_samples(&self) -> usize {
        self.hessian.as_ref().map_or(0, HessianAccumulator::n_samples)
    }

    /// Fold a calibration batch into the running Hessian
    ///
    /// # Arguments
    /// * `inp` - Layer input activations; any leading rank is flattened to
    ///   positions, the trailing axis must match the layer's columns
    /// * `out` - Layer output for capture-hook symmetry; unused
    pub fn add_batch(&mut self, inp: ArrayViewD<f32>, _out: Option<ArrayViewD<f32>>) -> Result<()> {
        if self.state != SessionState::Accumulating {
            return Err(GptqError::InvalidState {
                expected: SessionState::Accumulating.as_str(),
                actual: self.state.as_str(),
            });
        }
        let flat = flatten_positions(&inp, self.columns)?;
        match self.hessian.as_mut() {
            Some(hessian) => hessian.add_batch(flat.view()),
            None => Err(GptqError::InvalidState {
                expected: SessionState::Accumulating.as_str(),
                actual: SessionState::Failed.as_str(),
            }),
        }
    }

    /// Run the one-shot blockwise quantization pass on `layer`
    ///
    /// A layer without quantization arguments is skipped (debug log, no-op);
    /// the session still advances to `Compressed`. Any further `compress`
    /// call is a state-misuse error.
    pub fn compress<L: CompressibleLayer + ?Sized>(
        &mut self,
        layer: &mut L,
        config: &GptqConfig,
    ) -> Result<()> {
        if self.state != SessionState::Accumulating {
            return Err(GptqError::InvalidState {
                expected: SessionState::Accumulating.as_str(),
                actual: self.state.as_str(),
            });
        }

        let Some(args) = layer.quantization_args().cloned() else {
            tracing::debug!(layer = %self.name, "skipping unquantized layer");
            self.state = SessionState::Compressed;
            return Ok(());
        };
        args.validate()?;

        let tick = Instant::now();

        let w = layer.weight_matrix();
        let (rows, columns) = w.dim();
        if columns != self.columns {
            return Err(GptqError::ShapeMismatch {
                expected: vec![rows, self.columns],
                got: vec![rows, columns],
            });
        }
        let h = self
            .hessian
            .take()
            .ok_or(GptqError::InvalidState {
                expected: SessionState::Accumulating.as_str(),
                actual: SessionState::Failed.as_str(),
            })?
            .into_matrix();

        // the Hessian is consumed from here on; a failure is unrecoverable
        // and parks the session in `Failed`, where only `free` is accepted
        match Self::run_quantization(layer, config, &args, self.compute_device, w, h) {
            Ok((total_loss, compressed_bytes)) => {
                self.state = SessionState::Compressed;
                self.reporter.report(&CompressionMetrics {
                    layer: self.name.clone(),
                    elapsed: tick.elapsed(),
                    total_loss,
                    compressed_bytes,
                });
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Failed;
                Err(err)
            }
        }
    }

    /// Quantize `w` against `h` and commit the result onto the layer
    ///
    /// Returns the summed quantization loss and the compressed size estimate.
    fn run_quantization<L: CompressibleLayer + ?Sized>(
        layer: &mut L,
        config: &GptqConfig,
        args: &QuantizationArgs,
        compute_device: Device,
        mut w: Array2<f32>,
        mut h: Array2<f32>,
    ) -> Result<(f32, usize)> {
        let (rows, columns) = w.dim();
        let mut observer = QuantObserver::new(args.clone(), rows, columns)?;
        let mut g_idx: Option<Vec<usize>> = None;
        let mut invperm: Option<Vec<usize>> = None;

        if args.strategy == QuantizationStrategy::Group {
            let size = args.group_size.unwrap_or(columns).max(1);
            let mut idx: Vec<usize> = (0..columns).map(|c| c / size).collect();
            match args.actorder {
                ActivationOrdering::Group => {
                    // permute first, then assign groups on the permuted order;
                    // the index map is inverted back at the end and persisted
                    let perm = activation_order(h.diag());
                    w = permute_columns(&w, &perm);
                    h = permute_hessian(&h, &perm);
                    invperm = Some(invert_permutation(&perm));
                    observer.observe(w.view());
                }
                ActivationOrdering::Weight => {
                    // calibrate on the original order, then permute; the
                    // permuted map keeps groups consistent and returns to
                    // identity after un-permutation
                    observer.observe(w.view());
                    let perm = activation_order(h.diag());
                    w = permute_columns(&w, &perm);
                    h = permute_hessian(&h, &perm);
                    idx = permute_indices(&idx, &perm);
                    invperm = Some(invert_permutation(&perm));
                }
                ActivationOrdering::None => observer.observe(w.view()),
            }
            g_idx = Some(idx);
        } else {
            observer.observe(w.view());
        }

        let sparsity = tensor_sparsity(&w);
        let mask = (sparsity >= SPARSITY_THRESHOLD).then(|| nonzero_mask(&w));

        let losses = quantize_blockwise(
            &mut w,
            h,
            &mut observer,
            g_idx.as_deref(),
            mask.as_ref(),
            config,
        )?;

        let mut persisted_g_idx: Option<Vec<u32>> = None;
        if let (Some(inv), Some(idx)) = (invperm.as_ref(), g_idx.as_ref()) {
            w = permute_columns(&w, inv);
            if args.actorder == ActivationOrdering::Group {
                persisted_g_idx = Some(
                    permute_indices(idx, inv).iter().map(|&g| g as u32).collect(),
                );
            }
        }

        // commit: stage onto the compute device, replace in place, and
        // return the weight to its resting place whatever happens
        layer.stage_on_device(compute_device);
        let committed = layer.replace_weight(&w);
        layer.restore_device();
        committed?;

        let params = observer.export_params(persisted_g_idx);
        let compressed_bytes =
            (rows * columns * args.scheme.bits as usize).div_ceil(8) + params.param_bytes();
        layer.set_quantization_params(params);

        Ok((losses.sum(), compressed_bytes))
    }

    /// Release the Hessian
    ///
    /// Valid after compression (successful or failed), or from
    /// `Accumulating` as an early abort (in which case quantization was
    /// never applied). The session must not be used afterwards.
    pub fn free(&mut self) -> Result<()> {
        match self.state {
            SessionState::Accumulating | SessionState::Compressed | SessionState::Failed => {
                self.hessian = None;
                self.state = SessionState::Released;
                Ok(())
            }
            SessionState::Released => Err(GptqError::InvalidState {
                expected: "Accumulating, Compressed or Failed",
                actual: SessionState::Released.as_str(),
            }),
        }
    }
}

/// Flatten any leading rank to positions, keeping the trailing feature axis
fn flatten_positions(inp: &ArrayViewD<f32>, columns: usize) -> Result<Array2<f32>> {
    let len = inp.len();
    if columns == 0 || len % columns != 0 {
        return Err(GptqError::ShapeMismatch {
            expected: vec![len / columns.max(1), columns],
            got: inp.shape().to_vec(),
        });
    }
    let positions = len / columns;
    let flat: Vec<f32> = inp.iter().copied().collect();
    Array2::from_shape_vec((positions, columns), flat).map_err(|_| GptqError::ShapeMismatch {
        expected: vec![positions, columns],
        got: inp.shape().to_vec(),
    })
}
