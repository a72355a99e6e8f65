//! Graph compiler for Kiln.
//!
//! This crate turns a [`kiln_core::Graph`] into a compiled backend
//! [`Runtime`](kiln_backend::Runtime). Compilation runs in three steps:
//! 1. **Sort** - order the operators the named outputs depend on
//! 2. **Bind** - give every touched operand exactly one backend value
//! 3. **Lower** - emit one backend node per operator, then build the runtime
//!
//! # Example
//!
//! ```
//! use kiln_core::{DataType, GraphBuilder, OperandDescriptor};
//!
//! # fn main() -> kiln_core::Result<()> {
//! let mut builder = GraphBuilder::new();
//! let x = builder.input("x", OperandDescriptor::new(DataType::F32, vec![4]))?;
//! let y = builder.relu(x)?;
//! let graph = builder.build(&[("y", y)])?;
//!
//! kiln_backend::initialize().expect("backend init");
//! let compiled = kiln_compiler::compile(&graph)?;
//! assert_eq!(compiled.order.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod bindings;
pub mod compile;
pub mod error;
pub mod lowering;
pub mod scheduler;

pub use bindings::{backend_datatype, BindingTable, ValueBinding, ValueRole};
pub use compile::{compile, CompiledGraph};
pub use error::{map_backend_error, BackendResultExt};
pub use lowering::lower_operator;
pub use scheduler::sort_operators;

pub use kiln_backend::ValueId;
