//! Layer graph construction and evaluation
//!
//! [`Graph::build`] turns an ordered sequence of layer specs into connected
//! nodes, each consuming the previous node's output. The graph exposes a
//! training forward/backward pair used by the step function and a pure
//! inference forward used by prediction.

mod conv;
mod node;

pub use node::{ConvNode, DenseNode, GraphNode};

use ndarray::{Array2, Array4, ArrayView2};
use rand::rngs::StdRng;

use crate::activation;
use crate::error::{Error, Result};
use crate::optim::UpdateRule;
use crate::spec::{BorderMode, LayerSpec};

/// Geometry of the network input
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputShape {
    /// `width` features per sample
    Flat(usize),
    /// One image per sample, channels first
    Spatial {
        channels: usize,
        height: usize,
        width: usize,
    },
}

impl InputShape {
    pub fn flat_len(&self) -> usize {
        self.feature().flat_len()
    }

    fn feature(&self) -> FeatureShape {
        match *self {
            InputShape::Flat(width) => FeatureShape::Flat(width),
            InputShape::Spatial {
                channels,
                height,
                width,
            } => FeatureShape::Spatial {
                channels,
                height,
                width,
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.flat_len() == 0 {
            return Err(Error::config("input", "input shape must be non-empty"));
        }
        Ok(())
    }
}

/// Shape of the features flowing between two nodes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FeatureShape {
    Flat(usize),
    Spatial {
        channels: usize,
        height: usize,
        width: usize,
    },
}

impl FeatureShape {
    pub(crate) fn flat_len(&self) -> usize {
        match *self {
            FeatureShape::Flat(width) => width,
            FeatureShape::Spatial {
                channels,
                height,
                width,
            } => channels * height * width,
        }
    }
}

/// A batch of values flowing through the graph
pub(crate) enum Value {
    Flat(Array2<f32>),
    Spatial(Array4<f32>),
}

impl Value {
    /// Reshape to match `shape`, keeping the batch dimension
    pub(crate) fn conform(self, shape: FeatureShape) -> Value {
        match (self, shape) {
            (Value::Flat(x), FeatureShape::Flat(_)) => Value::Flat(x),
            (Value::Spatial(x), FeatureShape::Spatial { .. }) => Value::Spatial(x),
            (
                Value::Flat(x),
                FeatureShape::Spatial {
                    channels,
                    height,
                    width,
                },
            ) => {
                let n = x.nrows();
                Value::Spatial(
                    x.into_shape((n, channels, height, width))
                        .expect("flat and spatial lengths agree"),
                )
            }
            (Value::Spatial(x), FeatureShape::Flat(len)) => {
                let n = x.dim().0;
                Value::Flat(x.into_shape((n, len)).expect("flat and spatial lengths agree"))
            }
        }
    }

    pub(crate) fn into_flat(self) -> Array2<f32> {
        match self {
            Value::Flat(x) => x,
            Value::Spatial(x) => {
                let (n, c, h, w) = x.dim();
                x.into_shape((n, c * h * w)).expect("contiguous reshape")
            }
        }
    }

    pub(crate) fn into_spatial(self, shape: FeatureShape) -> Array4<f32> {
        match self.conform(shape) {
            Value::Spatial(x) => x,
            Value::Flat(_) => unreachable!("conform to a spatial shape yields a spatial value"),
        }
    }
}

/// The built computational graph
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<GraphNode>,
    input_shape: InputShape,
}

impl Graph {
    /// Build one node per spec, wired input side first
    ///
    /// Fails fast on invalid layer values, unknown activations, or a
    /// convolution placed where no spatial shape is available.
    pub fn build(specs: &[LayerSpec], input_shape: InputShape, rng: &mut StdRng) -> Result<Self> {
        if specs.is_empty() {
            return Err(Error::config("layers", "at least one layer is required"));
        }
        input_shape.validate()?;

        let mut nodes = Vec::with_capacity(specs.len());
        let mut current = input_shape.feature();

        for spec in specs {
            spec.validate()?;
            let act = activation::resolve(spec.name(), spec.activation())?;

            match spec {
                LayerSpec::Dense { name, units, .. } => {
                    nodes.push(GraphNode::Dense(DenseNode::new(
                        name.clone(),
                        current,
                        *units,
                        act,
                        spec.dropout(),
                        rng,
                    )));
                    current = FeatureShape::Flat(*units);
                }
                LayerSpec::Convolution {
                    name,
                    channels,
                    kernel_shape,
                    kernel_stride,
                    border_mode,
                    pool_shape,
                    pool_type,
                    ..
                } => {
                    let (in_h, in_w) = match current {
                        FeatureShape::Spatial { height, width, .. } => (height, width),
                        FeatureShape::Flat(_) => {
                            return Err(Error::config(
                                name,
                                "convolution requires a spatial input shape",
                            ));
                        }
                    };
                    if !act.is_elementwise() {
                        return Err(Error::config(
                            name,
                            "softmax cannot be applied to convolution feature maps",
                        ));
                    }

                    let (kh, kw) = *kernel_shape;
                    let pad = match border_mode.unwrap_or_default() {
                        BorderMode::Valid => (0, 0),
                        BorderMode::Same => ((kh - 1) / 2, (kw - 1) / 2),
                        BorderMode::Full => (kh - 1, kw - 1),
                    };
                    let (ph, pw) = (in_h + 2 * pad.0, in_w + 2 * pad.1);
                    if ph < kh || pw < kw {
                        return Err(Error::config(
                            name,
                            format!("kernel {kh}x{kw} exceeds the {ph}x{pw} padded input"),
                        ));
                    }
                    let (mut out_h, mut out_w) = (ph - kh + 1, pw - kw + 1);

                    // A trivial (1, 1) window disables pooling
                    let pool = match pool_shape {
                        Some(shape) if *shape != (1, 1) => {
                            let stride = kernel_stride.unwrap_or(*shape);
                            if out_h < shape.0 || out_w < shape.1 {
                                return Err(Error::config(
                                    name,
                                    format!(
                                        "pool window {}x{} exceeds the {out_h}x{out_w} feature map",
                                        shape.0, shape.1
                                    ),
                                ));
                            }
                            if stride.0 == 0 || stride.1 == 0 {
                                return Err(Error::config(name, "`kernel_stride` must be non-zero"));
                            }
                            out_h = (out_h - shape.0) / stride.0 + 1;
                            out_w = (out_w - shape.1) / stride.1 + 1;
                            Some(node::PoolConfig {
                                shape: *shape,
                                stride,
                                kind: pool_type.unwrap_or_default(),
                            })
                        }
                        _ => None,
                    };

                    let output = FeatureShape::Spatial {
                        channels: *channels,
                        height: out_h,
                        width: out_w,
                    };
                    nodes.push(GraphNode::Conv(ConvNode::new(
                        name.clone(),
                        current,
                        output,
                        *channels,
                        *kernel_shape,
                        pad,
                        pool,
                        act,
                        rng,
                    )));
                    current = output;
                }
            }
        }

        Ok(Self { nodes, input_shape })
    }

    /// Training forward pass: dropout active, caches retained for backward
    pub fn forward_train(&mut self, x: ArrayView2<f32>, rng: &mut StdRng) -> Array2<f32> {
        let mut value = self.input_value(x);
        for node in &mut self.nodes {
            value = node.forward_train(value, rng);
        }
        value.into_flat()
    }

    /// Deterministic inference forward pass: no dropout, no caches
    pub fn forward_infer(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut value = self.input_value(x);
        for node in &self.nodes {
            value = node.forward_infer(value);
        }
        value.into_flat()
    }

    /// Backward pass for the most recent training forward
    ///
    /// Fills every node's gradient buffers; `grad_out` is the gradient of
    /// the scalar cost w.r.t. the network output.
    pub fn backward(&mut self, grad_out: Array2<f32>) {
        let mut grad = Value::Flat(grad_out);
        for node in self.nodes.iter_mut().rev() {
            grad = node.backward(grad);
        }
    }

    /// Run one optimizer step over every trainable parameter
    pub fn apply_updates(&mut self, rule: &mut dyn UpdateRule) {
        for (i, node) in self.nodes.iter_mut().enumerate() {
            node.apply_update(2 * i, rule);
        }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [GraphNode] {
        &mut self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Width of the final node's output
    pub fn output_width(&self) -> usize {
        self.nodes.last().map_or(0, GraphNode::output_len)
    }

    pub fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    fn input_value(&self, x: ArrayView2<f32>) -> Value {
        Value::Flat(x.to_owned()).conform(self.input_shape.feature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_build_one_node_per_spec() {
        let specs = vec![
            LayerSpec::dense("h0", 8, "Rectifier"),
            LayerSpec::dense("h1", 4, "Tanh"),
            LayerSpec::dense("out", 2, "Linear"),
        ];
        let graph = Graph::build(&specs, InputShape::Flat(3), &mut rng()).unwrap();
        assert_eq!(graph.len(), specs.len());
        assert_eq!(graph.output_width(), 2);
        for (node, spec) in graph.nodes().iter().zip(&specs) {
            assert_eq!(node.name(), spec.name());
        }
    }

    #[test]
    fn test_dense_weight_shapes_chain() {
        let specs = vec![
            LayerSpec::dense("h0", 8, "Rectifier"),
            LayerSpec::dense("out", 2, "Linear"),
        ];
        let graph = Graph::build(&specs, InputShape::Flat(5), &mut rng()).unwrap();
        assert_eq!(graph.nodes()[0].weight_shape(), vec![5, 8]);
        assert_eq!(graph.nodes()[1].weight_shape(), vec![8, 2]);
        assert_eq!(graph.nodes()[1].bias_shape(), vec![2]);
    }

    #[test]
    fn test_unknown_activation_fails_naming_layer() {
        let specs = vec![LayerSpec::dense("weird", 4, "Swish")];
        let err = Graph::build(&specs, InputShape::Flat(2), &mut rng()).unwrap_err();
        match err {
            Error::UnsupportedActivation { layer, activation } => {
                assert_eq!(layer, "weird");
                assert_eq!(activation, "Swish");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_convolution_on_flat_input_rejected() {
        let specs = vec![LayerSpec::convolution("conv0", 4, (3, 3), "Rectifier")];
        let err = Graph::build(&specs, InputShape::Flat(9), &mut rng()).unwrap_err();
        assert!(format!("{err}").contains("spatial"));
    }

    #[test]
    fn test_convolution_stack_shapes() {
        let specs = vec![
            LayerSpec::Convolution {
                name: "conv0".to_string(),
                channels: 4,
                kernel_shape: (3, 3),
                kernel_stride: None,
                border_mode: None,
                pool_shape: Some((2, 2)),
                pool_type: None,
                activation: "Rectifier".to_string(),
            },
            LayerSpec::dense("out", 2, "Linear"),
        ];
        let input = InputShape::Spatial {
            channels: 1,
            height: 8,
            width: 8,
        };
        let graph = Graph::build(&specs, input, &mut rng()).unwrap();
        // 8x8 valid-conv 3x3 -> 6x6, pooled 2x2 stride 2 -> 3x3
        assert_eq!(graph.nodes()[0].weight_shape(), vec![4, 1, 3, 3]);
        assert_eq!(graph.nodes()[1].weight_shape(), vec![4 * 3 * 3, 2]);

        let x = Array2::zeros((2, 64));
        let out = graph.forward_infer(x.view());
        assert_eq!(out.dim(), (2, 2));
    }

    #[test]
    fn test_same_border_mode_preserves_size() {
        let specs = vec![
            LayerSpec::Convolution {
                name: "conv0".to_string(),
                channels: 2,
                kernel_shape: (3, 3),
                kernel_stride: None,
                border_mode: Some(BorderMode::Same),
                pool_shape: None,
                pool_type: None,
                activation: "Linear".to_string(),
            },
            LayerSpec::dense("out", 1, "Linear"),
        ];
        let input = InputShape::Spatial {
            channels: 1,
            height: 5,
            width: 5,
        };
        let graph = Graph::build(&specs, input, &mut rng()).unwrap();
        // Same padding keeps 5x5, so the dense layer sees 2*5*5 inputs
        assert_eq!(graph.nodes()[1].weight_shape(), vec![50, 1]);
    }

    #[test]
    fn test_forward_backward_roundtrip_runs() {
        let specs = vec![
            LayerSpec::dense("h0", 6, "Tanh"),
            LayerSpec::dense("out", 1, "Linear"),
        ];
        let mut r = rng();
        let mut graph = Graph::build(&specs, InputShape::Flat(4), &mut r).unwrap();
        let x = Array2::from_shape_fn((10, 4), |(i, j)| (i + j) as f32 * 0.1);
        let out = graph.forward_train(x.view(), &mut r);
        assert_eq!(out.dim(), (10, 1));
        graph.backward(Array2::ones((10, 1)));
    }

    #[test]
    fn test_infer_is_deterministic() {
        let specs = vec![LayerSpec::Dense {
            name: "h0".to_string(),
            units: 3,
            activation: "Sigmoid".to_string(),
            dropout: Some(0.4),
            weight_decay: None,
        }];
        let graph = Graph::build(&specs, InputShape::Flat(6), &mut rng()).unwrap();
        let x = Array2::ones((4, 6));
        let a = graph.forward_infer(x.view());
        let b = graph.forward_infer(x.view());
        assert_abs_diff_eq!(a, b, epsilon = 0.0);
    }
}
