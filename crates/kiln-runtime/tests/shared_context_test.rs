//! Reference counting of the process-wide backend.
//!
//! Kept in its own test binary so no other test holds a reference.

mod common;

use common::{add_graph, add_inputs, init_tracing};
use kiln_runtime::{Context, ContextOptions, SharedContext};

#[test]
fn test_global_context_lifecycle() {
    init_tracing();
    let shared = SharedContext::global();
    assert_eq!(shared.ref_count(), 0);
    assert!(!kiln_backend::is_initialized());
    let inits_before = kiln_backend::initialization_count();

    let options = ContextOptions::default().with_worker_threads(1);
    let context = Context::with_options(options.clone()).unwrap();
    assert_eq!(shared.ref_count(), 1);
    assert!(kiln_backend::is_initialized());

    let program = context.build_sync(&add_graph()).unwrap();
    let second = Context::with_options(options).unwrap();
    assert_eq!(shared.ref_count(), 3);
    assert_eq!(kiln_backend::initialization_count(), inits_before + 1);

    drop(context);
    drop(second);
    assert_eq!(shared.ref_count(), 1);
    assert!(kiln_backend::is_initialized());

    let mut outputs = program.allocate_outputs().unwrap();
    program
        .compute(&add_inputs([1.0; 4], [1.0; 4]), &mut outputs)
        .unwrap();

    drop(program);
    assert_eq!(shared.ref_count(), 0);
    assert!(!kiln_backend::is_initialized());

    // A fresh cycle initializes again.
    let context = Context::with_options(ContextOptions::default().with_worker_threads(1)).unwrap();
    assert_eq!(kiln_backend::initialization_count(), inits_before + 2);
    drop(context);
    assert!(!kiln_backend::is_initialized());
}
