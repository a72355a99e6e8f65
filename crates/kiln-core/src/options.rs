//! Operator kinds and their attribute bundles.
//!
//! Attribute values arrive here already validated by the graph builder. The
//! compiler copies them verbatim into backend node definitions, so adding a
//! variant to [`OperatorKind`] forces every lowering `match` to handle it.

/// Elementwise binary operators. All of them broadcast their inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    Pow,
}

impl BinaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
            BinaryOp::Pow => "pow",
        }
    }
}

/// Elementwise unary operators without attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Abs,
    Ceil,
    Floor,
    Neg,
    Sqrt,
    Exp,
    Sigmoid,
    Tanh,
    Relu,
    HardSwish,
}

impl UnaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Abs => "abs",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Floor => "floor",
            UnaryOp::Neg => "neg",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Relu => "relu",
            UnaryOp::HardSwish => "hardSwish",
        }
    }
}

/// Bounds for `clamp`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClampOptions {
    pub min: f32,
    pub max: f32,
}

impl Default for ClampOptions {
    fn default() -> Self {
        Self {
            min: f32::NEG_INFINITY,
            max: f32::INFINITY,
        }
    }
}

/// Memory layout of a 4-D activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InputLayout {
    Nchw,
    #[default]
    Nhwc,
}

/// Memory layout of a 4-D convolution filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterLayout {
    Oihw,
    Hwio,
    #[default]
    Ohwi,
    Ihwo,
}

/// Attributes of `conv2d`.
///
/// `padding` is `[top, bottom, left, right]`; `strides` and `dilations` are
/// `[height, width]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2dOptions {
    pub padding: [usize; 4],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
    pub groups: usize,
    pub input_layout: InputLayout,
    pub filter_layout: FilterLayout,
}

impl Default for Conv2dOptions {
    fn default() -> Self {
        Self {
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            groups: 1,
            input_layout: InputLayout::default(),
            filter_layout: FilterLayout::default(),
        }
    }
}

/// Reduction applied by a 2-D pooling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Average,
    Max,
}

/// Attributes of `averagePool2d` / `maxPool2d`.
///
/// A missing window covers the whole spatial extent of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool2dOptions {
    pub window_dimensions: Option<[usize; 2]>,
    pub padding: [usize; 4],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
    pub layout: InputLayout,
}

impl Default for Pool2dOptions {
    fn default() -> Self {
        Self {
            window_dimensions: None,
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            layout: InputLayout::default(),
        }
    }
}

/// Attributes of `gemm`: `alpha * A' * B' + beta * C`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemmOptions {
    pub alpha: f32,
    pub beta: f32,
    pub a_transpose: bool,
    pub b_transpose: bool,
}

impl Default for GemmOptions {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            a_transpose: false,
            b_transpose: false,
        }
    }
}

/// Fill rule for `pad`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PadMode {
    #[default]
    Constant,
    Edge,
    Reflection,
    Symmetric,
}

/// Attributes of `pad`.
#[derive(Debug, Clone, PartialEq)]
pub struct PadOptions {
    pub beginning: Vec<usize>,
    pub ending: Vec<usize>,
    pub mode: PadMode,
    pub value: f32,
}

/// Operator kind plus its attribute bundle.
///
/// Operand arity is fixed per kind except where noted:
/// - `Conv2d`: input, filter, optional bias
/// - `Gemm`: a, b, optional c
/// - `Concat`: one or more inputs
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorKind {
    Binary(BinaryOp),
    Unary(UnaryOp),
    Clamp(ClampOptions),
    Elu { alpha: f32 },
    LeakyRelu { alpha: f32 },
    Conv2d(Conv2dOptions),
    Pool2d { kind: PoolKind, options: Pool2dOptions },
    Gemm(GemmOptions),
    /// Target shape is the output operand's shape.
    Reshape,
    /// Normalizes over the last axis.
    Softmax,
    Transpose { permutation: Vec<usize> },
    Concat { axis: usize },
    Pad(PadOptions),
}

impl OperatorKind {
    /// Operator name as written in graph-building code.
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Binary(op) => op.name(),
            OperatorKind::Unary(op) => op.name(),
            OperatorKind::Clamp(_) => "clamp",
            OperatorKind::Elu { .. } => "elu",
            OperatorKind::LeakyRelu { .. } => "leakyRelu",
            OperatorKind::Conv2d(_) => "conv2d",
            OperatorKind::Pool2d {
                kind: PoolKind::Average,
                ..
            } => "averagePool2d",
            OperatorKind::Pool2d {
                kind: PoolKind::Max,
                ..
            } => "maxPool2d",
            OperatorKind::Gemm(_) => "gemm",
            OperatorKind::Reshape => "reshape",
            OperatorKind::Softmax => "softmax",
            OperatorKind::Transpose { .. } => "transpose",
            OperatorKind::Concat { .. } => "concat",
            OperatorKind::Pad(_) => "pad",
        }
    }
}
