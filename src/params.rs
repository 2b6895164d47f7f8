//! Parameter extraction and injection
//!
//! [`extract`] copies the live parameters of a built graph into a plain
//! serializable snapshot; [`inject`] writes a snapshot back. Injection
//! validates every shape before touching any node, so a failed call leaves
//! the graph exactly as it was.

use ndarray::{Array1, ArrayD};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::Graph;

/// Parameters of one layer, detached from the graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerParams {
    pub name: String,
    pub weights: ArrayD<f32>,
    pub biases: Array1<f32>,
}

/// All trainable parameters of a network, in layer order
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub layers: Vec<LayerParams>,
}

/// Copy the graph's current parameters into a snapshot
pub fn extract(graph: &Graph) -> ParameterSnapshot {
    let layers = graph
        .nodes()
        .iter()
        .map(|node| LayerParams {
            name: node.name().to_string(),
            weights: node.weights().to_owned(),
            biases: node.biases().to_owned(),
        })
        .collect();
    ParameterSnapshot { layers }
}

/// Write a snapshot's parameters into the graph
///
/// Layers are matched by position; a snapshot shorter than the graph leaves
/// the trailing layers untouched, and extra snapshot entries are ignored.
/// Every paired layer is shape-checked before any write happens.
pub fn inject(graph: &mut Graph, snapshot: &ParameterSnapshot) -> Result<()> {
    for (node, params) in graph.nodes().iter().zip(&snapshot.layers) {
        if params.weights.shape() != node.weight_shape().as_slice() {
            return Err(Error::ShapeMismatch {
                what: "weights",
                layer: node.name().to_string(),
                expected: node.weight_shape(),
                actual: params.weights.shape().to_vec(),
            });
        }
        if params.biases.len() != node.bias_shape()[0] {
            return Err(Error::ShapeMismatch {
                what: "biases",
                layer: node.name().to_string(),
                expected: node.bias_shape(),
                actual: vec![params.biases.len()],
            });
        }
    }
    for (node, params) in graph.nodes_mut().iter_mut().zip(&snapshot.layers) {
        node.set_params(&params.weights, &params.biases);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InputShape;
    use crate::spec::LayerSpec;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, ArrayD};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn graph() -> Graph {
        let specs = vec![
            LayerSpec::dense("h0", 4, "Tanh"),
            LayerSpec::dense("out", 2, "Linear"),
        ];
        let mut rng = StdRng::seed_from_u64(21);
        Graph::build(&specs, InputShape::Flat(3), &mut rng).unwrap()
    }

    #[test]
    fn test_extract_matches_live_values() {
        let graph = graph();
        let snapshot = extract(&graph);
        assert_eq!(snapshot.layers.len(), 2);
        assert_eq!(snapshot.layers[0].name, "h0");
        assert_eq!(snapshot.layers[0].weights.shape(), &[3, 4]);
        assert_eq!(snapshot.layers[1].biases.len(), 2);
        for (node, params) in graph.nodes().iter().zip(&snapshot.layers) {
            assert_abs_diff_eq!(node.weights(), params.weights.view(), epsilon = 0.0);
        }
    }

    #[test]
    fn test_inject_roundtrip() {
        let mut a = graph();
        let mut rng = StdRng::seed_from_u64(99);
        let specs = vec![
            LayerSpec::dense("h0", 4, "Tanh"),
            LayerSpec::dense("out", 2, "Linear"),
        ];
        let b = Graph::build(&specs, InputShape::Flat(3), &mut rng).unwrap();

        let snapshot = extract(&b);
        inject(&mut a, &snapshot).unwrap();
        assert_eq!(extract(&a), snapshot);
    }

    #[test]
    fn test_inject_rejects_wrong_weight_shape() {
        let mut g = graph();
        let before = extract(&g);

        let mut snapshot = before.clone();
        snapshot.layers[1].weights = ArrayD::zeros(vec![2, 4]);
        let err = inject(&mut g, &snapshot).unwrap_err();
        match err {
            Error::ShapeMismatch {
                what,
                layer,
                expected,
                actual,
            } => {
                assert_eq!(what, "weights");
                assert_eq!(layer, "out");
                assert_eq!(expected, vec![4, 2]);
                assert_eq!(actual, vec![2, 4]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The earlier layer must not have been written either
        assert_eq!(extract(&g), before);
    }

    #[test]
    fn test_inject_rejects_wrong_bias_shape() {
        let mut g = graph();
        let mut snapshot = extract(&g);
        snapshot.layers[0].biases = Array1::zeros(7);
        let err = inject(&mut g, &snapshot).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { what: "biases", .. }));
    }

    #[test]
    fn test_short_snapshot_leaves_tail_untouched() {
        let mut g = graph();
        let before = extract(&g);

        let mut snapshot = ParameterSnapshot {
            layers: vec![before.layers[0].clone()],
        };
        snapshot.layers[0].weights.fill(0.5);
        inject(&mut g, &snapshot).unwrap();

        let after = extract(&g);
        assert!(after.layers[0].weights.iter().all(|&w| w == 0.5));
        assert_eq!(after.layers[1], before.layers[1]);
    }

    #[test]
    fn test_snapshot_serde_roundtrip() {
        let snapshot = extract(&graph());
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: ParameterSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
    }
}
