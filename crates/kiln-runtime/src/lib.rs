//! Build and run Kiln graphs.
//!
//! This crate ties the compiler to the backend and adds the pieces a caller
//! needs around them:
//! 1. **Shared context** - reference-counted init/deinit of the backend
//! 2. **Programs** - compiled graphs, reusable across computes
//! 3. **Orchestration** - sync and async build/compute on a worker pool
//!
//! # Example
//!
//! ```
//! use kiln_core::{DataType, GraphBuilder, OperandDescriptor};
//! use kiln_runtime::{Context, Tensor};
//! use std::collections::HashMap;
//!
//! # fn main() -> kiln_core::Result<()> {
//! let desc = OperandDescriptor::new(DataType::F32, vec![4]);
//! let mut builder = GraphBuilder::new();
//! let a = builder.input("a", desc.clone())?;
//! let b = builder.input("b", desc.clone())?;
//! let c = builder.add(a, b)?;
//! let graph = builder.build(&[("c", c)])?;
//!
//! let context = Context::new()?;
//! let program = context.build_sync(&graph)?;
//!
//! let inputs = HashMap::from([
//!     ("a".to_string(), Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[4])?),
//!     ("b".to_string(), Tensor::from_vec(vec![5.0f32, 6.0, 7.0, 8.0], &[4])?),
//! ]);
//! let mut outputs = program.allocate_outputs()?;
//! program.compute(&inputs, &mut outputs)?;
//! assert_eq!(outputs["c"].to_vec::<f32>()?, vec![6.0, 8.0, 10.0, 12.0]);
//! # Ok(())
//! # }
//! ```

mod completion;
mod context;
mod options;
mod program;
mod shared;
mod tensor;
mod worker;

pub use completion::{ChannelCompletion, CompletionContext, InlineCompletion, Task};
pub use context::{BuildCallback, ComputeCallback, ComputeOutcome, Context};
pub use options::{ContextOptions, WORKER_THREADS_ENV};
pub use program::GraphProgram;
pub use shared::{BackendLibrary, ContextHandle, SharedContext};
pub use tensor::Tensor;
pub use worker::WorkerPool;

pub use kiln_backend::ValueId;
