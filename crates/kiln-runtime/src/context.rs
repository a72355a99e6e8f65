//! Build and compute orchestration.

use crate::completion::{CompletionContext, InlineCompletion};
use crate::options::ContextOptions;
use crate::program::GraphProgram;
use crate::shared::{ContextHandle, SharedContext};
use crate::tensor::Tensor;
use crate::worker::WorkerPool;
use futures::channel::oneshot;
use kiln_core::{Error, Graph, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Callback receiving the result of an asynchronous build.
pub type BuildCallback = Box<dyn FnOnce(Result<GraphProgram>) + Send + 'static>;

/// Callback receiving the result of an asynchronous compute.
pub type ComputeCallback = Box<dyn FnOnce(ComputeOutcome) + Send + 'static>;

/// Result of an asynchronous compute, with the caller's tensors handed back.
#[derive(Debug)]
pub struct ComputeOutcome {
    pub result: Result<()>,
    pub inputs: HashMap<String, Tensor>,
    pub outputs: HashMap<String, Tensor>,
}

impl ComputeOutcome {
    /// The output tensors if the compute succeeded.
    pub fn into_outputs(self) -> Result<HashMap<String, Tensor>> {
        self.result.map(|()| self.outputs)
    }
}

/// Everything a worker needs to build one graph.
struct BuildJob {
    graph: Graph,
    context: ContextHandle,
    completion: Arc<dyn CompletionContext>,
    on_complete: BuildCallback,
}

impl BuildJob {
    fn run(self) {
        let Self {
            graph,
            context,
            completion,
            on_complete,
        } = self;
        let result = GraphProgram::compile(&graph, context);
        // The graph is not needed once compiled.
        drop(graph);
        completion.post(Box::new(move || on_complete(result)));
    }
}

/// Everything a worker needs to run one compute.
struct ComputeJob {
    program: Arc<GraphProgram>,
    inputs: HashMap<String, Tensor>,
    outputs: HashMap<String, Tensor>,
    completion: Arc<dyn CompletionContext>,
    on_complete: ComputeCallback,
}

impl ComputeJob {
    fn run(self) {
        let Self {
            program,
            inputs,
            mut outputs,
            completion,
            on_complete,
        } = self;
        let result = program.compute(&inputs, &mut outputs);
        drop(program);
        completion.post(Box::new(move || {
            on_complete(ComputeOutcome {
                result,
                inputs,
                outputs,
            })
        }));
    }
}

/// Entry point for building and running graphs.
///
/// A context holds one reference to the shared backend and owns a worker
/// pool for the asynchronous calls. Programs it builds hold their own
/// reference, so they stay usable after the context is dropped.
#[derive(Debug)]
pub struct Context {
    // Dropped first: joins the workers, which finishes queued jobs.
    pool: WorkerPool,
    handle: ContextHandle,
    options: ContextOptions,
}

impl Context {
    /// Context over the process-wide backend, configured from the environment.
    pub fn new() -> Result<Self> {
        Self::with_options(ContextOptions::from_env())
    }

    pub fn with_options(options: ContextOptions) -> Result<Self> {
        Self::with_shared(SharedContext::global(), options)
    }

    /// Context over a specific shared backend.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be initialized or the worker threads
    /// cannot be spawned. Neither leaves a reference behind.
    pub fn with_shared(shared: Arc<SharedContext>, options: ContextOptions) -> Result<Self> {
        let handle = shared.acquire()?;
        let pool = WorkerPool::new(options.worker_threads)?;
        tracing::info!(workers = pool.size(), "created context");
        Ok(Self {
            pool,
            handle,
            options,
        })
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// The shared backend this context holds.
    pub fn shared(&self) -> &Arc<SharedContext> {
        self.handle.shared()
    }

    /// Compile a graph on the calling thread.
    ///
    /// # Errors
    ///
    /// `Unsupported` if the backend cannot run some operator or data type;
    /// otherwise the first backend failure. No program is returned on error.
    #[tracing::instrument(skip_all)]
    pub fn build_sync(&self, graph: &Graph) -> Result<GraphProgram> {
        GraphProgram::compile(graph, self.handle.try_clone()?)
    }

    /// Compile a graph on a worker thread.
    ///
    /// The graph and the callback move into the job. `on_complete` is posted
    /// to `completion` exactly once, with the program or the error.
    pub fn build_async(
        &self,
        graph: Graph,
        completion: &Arc<dyn CompletionContext>,
        on_complete: impl FnOnce(Result<GraphProgram>) + Send + 'static,
    ) {
        let context = match self.handle.try_clone() {
            Ok(context) => context,
            Err(err) => {
                completion.post(Box::new(move || on_complete(Err(err))));
                return;
            }
        };
        let job = BuildJob {
            graph,
            context,
            completion: Arc::clone(completion),
            on_complete: Box::new(on_complete),
        };
        tracing::debug!(operators = job.graph.operators().len(), "queued build");
        self.pool.execute(move || job.run());
    }

    /// [`build_async`](Self::build_async) as a future.
    pub fn build_future(
        &self,
        graph: Graph,
    ) -> impl Future<Output = Result<GraphProgram>> + Send + 'static {
        let (sender, receiver) = oneshot::channel();
        let completion: Arc<dyn CompletionContext> = Arc::new(InlineCompletion);
        self.build_async(graph, &completion, move |result| {
            // The receiver may already be gone; the program is dropped then.
            let _ = sender.send(result);
        });
        async move {
            receiver
                .await
                .map_err(|_| Error::InvalidState("build was abandoned".to_string()))?
        }
    }

    /// Run a program on a worker thread.
    ///
    /// The tensors move into the job and come back in the [`ComputeOutcome`]
    /// posted to `completion`.
    pub fn compute_async(
        &self,
        program: Arc<GraphProgram>,
        inputs: HashMap<String, Tensor>,
        outputs: HashMap<String, Tensor>,
        completion: &Arc<dyn CompletionContext>,
        on_complete: impl FnOnce(ComputeOutcome) + Send + 'static,
    ) {
        let job = ComputeJob {
            program,
            inputs,
            outputs,
            completion: Arc::clone(completion),
            on_complete: Box::new(on_complete),
        };
        self.pool.execute(move || job.run());
    }

    /// [`compute_async`](Self::compute_async) as a future.
    ///
    /// The outer error only reports a compute that never completed; the
    /// compute's own result is in the outcome.
    pub fn compute_future(
        &self,
        program: Arc<GraphProgram>,
        inputs: HashMap<String, Tensor>,
        outputs: HashMap<String, Tensor>,
    ) -> impl Future<Output = Result<ComputeOutcome>> + Send + 'static {
        let (sender, receiver) = oneshot::channel();
        let completion: Arc<dyn CompletionContext> = Arc::new(InlineCompletion);
        self.compute_async(program, inputs, outputs, &completion, move |outcome| {
            let _ = sender.send(outcome);
        });
        async move {
            receiver
                .await
                .map_err(|_| Error::InvalidState("compute was abandoned".to_string()))
        }
    }
}
