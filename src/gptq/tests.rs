//! Cross-module scenario tests for GPTQ compression

#[cfg(test)]
mod tests {
    use crate::gptq::{
        ActivationOrdering, CompressibleLayer, GptqConfig, LayerCompressionSession, LinearLayer,
        QuantObserver, QuantizationArgs, QuantizationScheme, SessionState,
    };
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    /// Feed a batch that makes the accumulated Hessian exactly the identity:
    /// X = sqrt(n/2)·I over n = columns samples gives H = (2/n)·XᵗX = I.
    fn feed_identity_hessian(session: &mut LayerCompressionSession, columns: usize) {
        let x = Array2::<f32>::eye(columns) * (columns as f32 / 2.0).sqrt();
        session.add_batch(x.view().into_dyn(), None).unwrap();
    }

    #[test]
    fn test_tensor_identity_hessian_matches_direct_quantization() {
        // independent columns: zero cross-column error propagation, so the
        // solver reduces to per-element fake quantization of the original
        let w0 = array![
            [0.9, -0.4, 0.2, -1.0],
            [0.1, 0.8, -0.7, 0.3],
            [-0.5, 0.6, 1.0, -0.2],
            [0.4, -0.9, 0.5, 0.7]
        ];
        let args = QuantizationArgs::tensor(QuantizationScheme::symmetric(2));
        let mut layer = LinearLayer::new(w0.clone()).with_quantization(args.clone());

        let mut session = LayerCompressionSession::new("fc1", 4);
        feed_identity_hessian(&mut session, 4);
        session.compress(&mut layer, &GptqConfig::default()).unwrap();

        let mut observer = QuantObserver::new(args, 4, 4).unwrap();
        observer.observe(w0.view());
        for col in 0..4 {
            let direct = observer.quantize_dequantize(w0.column(col), 0);
            for r in 0..4 {
                assert_abs_diff_eq!(layer.weight()[[r, col]], direct[r], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_channel_strategy_is_lossy_on_coarse_grids() {
        // a 2-bit grid cannot represent eight distinct magnitudes, so the
        // committed weight must move off the original values
        let w0 = array![
            [0.9, -0.4, 0.2, -1.0, 0.3, 0.8, -0.7, 0.5],
            [0.1, 0.8, -0.7, 0.3, -0.6, 0.2, 0.4, -0.9]
        ];
        let args = QuantizationArgs::channel(QuantizationScheme::symmetric(2));
        let mut layer = LinearLayer::new(w0.clone()).with_quantization(args.clone());

        let mut session = LayerCompressionSession::new("fc1", 8);
        feed_identity_hessian(&mut session, 8);
        session.compress(&mut layer, &GptqConfig::default()).unwrap();

        assert_ne!(layer.weight(), w0.view());

        // independent columns again: each column lands exactly where direct
        // quantization with its column-wide parameter pair puts it
        let mut observer = QuantObserver::new(args, 2, 8).unwrap();
        for col in 0..8 {
            observer.update_channel(w0.column(col));
            let direct = observer.quantize_dequantize(w0.column(col), 0);
            for r in 0..2 {
                assert_abs_diff_eq!(layer.weight()[[r, col]], direct[r], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_dead_column_scenario() {
        // column 2 never appears in any calibration batch
        let w0 = array![
            [0.9, -0.4, 5.0, -1.0],
            [0.1, 0.8, -3.0, 0.3]
        ];
        let mut layer = LinearLayer::new(w0)
            .with_quantization(QuantizationArgs::tensor(QuantizationScheme::symmetric(4)));

        let mut session = LayerCompressionSession::new("fc1", 4);
        let batch = array![
            [1.0f32, 0.5, 0.0, 0.2],
            [0.3, 1.0, 0.0, 0.8],
            [-0.4, 0.2, 0.0, 1.0]
        ];
        session.add_batch(batch.view().into_dyn(), None).unwrap();
        session.compress(&mut layer, &GptqConfig::default()).unwrap();

        assert_eq!(layer.weight()[[0, 2]], 0.0);
        assert_eq!(layer.weight()[[1, 2]], 0.0);
    }

    #[test]
    fn test_group_actorder_persists_reassigned_index_map() {
        // Hessian diagonal [0.1, 0.9, 0.5, 0.2] -> permutation [1, 2, 3, 0];
        // identity groups on the permuted order come back as [1, 0, 0, 1]
        let w0 = array![
            [0.9, -0.4, 0.2, -1.0],
            [0.1, 0.8, -0.7, 0.3],
            [-0.5, 0.6, 1.0, -0.2]
        ];
        let args = QuantizationArgs::group(QuantizationScheme::symmetric(4), 2)
            .with_actorder(ActivationOrdering::Group);
        let mut layer = LinearLayer::new(w0).with_quantization(args);

        let mut session = LayerCompressionSession::new("fc1", 4);
        // single sample: diag(H) = 2·x², so x_i = sqrt(d_i / 2)
        let x = array![[
            0.05f32.sqrt(),
            0.45f32.sqrt(),
            0.25f32.sqrt(),
            0.1f32.sqrt()
        ]];
        session.add_batch(x.view().into_dyn(), None).unwrap();
        session.compress(&mut layer, &GptqConfig::default()).unwrap();

        let params = layer.quantization_params().unwrap();
        let g_idx = params.g_idx.as_ref().unwrap();
        assert_eq!(g_idx, &vec![1, 0, 0, 1]);
        assert_ne!(g_idx, &vec![0, 0, 1, 1], "map must differ from identity");
        assert_eq!(params.num_groups, 2);
    }

    #[test]
    fn test_weight_actorder_does_not_persist_index_map() {
        let w0 = array![
            [0.9, -0.4, 0.2, -1.0],
            [0.1, 0.8, -0.7, 0.3]
        ];
        let args = QuantizationArgs::group(QuantizationScheme::symmetric(4), 2)
            .with_actorder(ActivationOrdering::Weight);
        let mut layer = LinearLayer::new(w0).with_quantization(args);

        let mut session = LayerCompressionSession::new("fc1", 4);
        let batch = array![
            [0.2f32, 0.9, 0.5, 0.3],
            [0.7, -0.1, 0.4, 0.8]
        ];
        session.add_batch(batch.view().into_dyn(), None).unwrap();
        session.compress(&mut layer, &GptqConfig::default()).unwrap();

        // identity again after un-permutation, so not persisted
        let params = layer.quantization_params().unwrap();
        assert!(params.g_idx.is_none());
    }

    #[test]
    fn test_group_strategy_end_to_end() {
        let w0 = array![
            [0.9, -0.4, 0.2, -1.0, 0.5, 0.6],
            [0.1, 0.8, -0.7, 0.3, -0.2, 0.4]
        ];
        let args = QuantizationArgs::group(QuantizationScheme::asymmetric(4), 3);
        let mut layer = LinearLayer::new(w0.clone()).with_quantization(args);

        let mut session = LayerCompressionSession::new("fc1", 6);
        feed_identity_hessian(&mut session, 6);
        session.compress(&mut layer, &GptqConfig { blocksize: 2, percdamp: 0.01 }).unwrap();

        let params = layer.quantization_params().unwrap();
        assert_eq!(params.num_groups, 2);
        assert_eq!(params.scales.len(), 2 * 2);
        // quantized weight stays near the original
        for (q, w) in layer.weight().iter().zip(w0.iter()) {
            assert!((q - w).abs() < 0.2, "quantized {q} too far from {w}");
        }
    }

    #[test]
    fn test_unconfigured_layer_is_skipped() {
        let w0 = array![[0.9f32, -0.4], [0.1, 0.8]];
        let mut layer = LinearLayer::new(w0.clone());

        let mut session = LayerCompressionSession::new("fc1", 2);
        feed_identity_hessian(&mut session, 2);
        session.compress(&mut layer, &GptqConfig::default()).unwrap();

        assert_eq!(layer.weight(), w0.view());
        assert!(layer.quantization_params().is_none());
        assert_eq!(session.state(), SessionState::Compressed);
    }

    #[test]
    fn test_weight_is_replaced_in_place_with_original_shape() {
        let w0 = array![[0.9f32, -0.4, 0.2], [0.1, 0.8, -0.7]];
        let mut layer = LinearLayer::new(w0.clone())
            .with_quantization(QuantizationArgs::tensor(QuantizationScheme::symmetric(4)));

        let mut session = LayerCompressionSession::new("fc1", 3);
        feed_identity_hessian(&mut session, 3);
        session.compress(&mut layer, &GptqConfig::default()).unwrap();

        assert_eq!(layer.weight_shape(), vec![2, 3]);
        assert_ne!(layer.weight(), w0.view());
    }
}
