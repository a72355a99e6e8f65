//! Reference CPU compute library for Kiln.
//!
//! The API follows the define-then-compile shape of native inference
//! libraries:
//! 1. [`initialize`] the library once per process
//! 2. declare tensor values and nodes on a [`Subgraph`]
//! 3. compile it into a [`Runtime`]
//! 4. [`Runtime::invoke`] with caller memory bound to the external values
//!
//! Values are either external (bound per invocation), static (data fixed at
//! definition) or internal (runtime-owned scratch). Arithmetic nodes support
//! [`Datatype::Fp32`]; data movement nodes support every datatype.

mod error;
mod kernels;
mod library;
mod node;
mod runtime;
mod subgraph;
mod types;

pub use error::{BackendError, Result, Status};
pub use library::{deinitialize, initialization_count, initialize, is_initialized};
pub use node::{
    BinaryKind, Convolution2dParams, FullyConnectedParams, Node, Pooling2dParams, UnaryKind,
};
pub use runtime::Runtime;
pub use subgraph::{Subgraph, TensorValue};
pub use types::{Datatype, ExternalInput, ExternalOutput, ValueFlags, ValueId};
