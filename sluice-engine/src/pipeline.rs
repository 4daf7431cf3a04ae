//! Pipeline
//!
//! The central entity: a source, an ordered transform chain and a sink,
//! composed once into an [`ExecutionPlan`] and then executed immediately,
//! on cron schedules, or as the successor of another pipeline.
//!
//! [`Pipeline`] is a cheap, cloneable handle. Configuration lives behind a
//! synchronous mutex that is never held across an await point; runs of the
//! same pipeline are serialized by an async run guard so scheduled firings
//! never overlap.
//!
//! Validation failures while configuring (`set_source`, `set_sink`,
//! `add_transform_specs`, `chain`) clear the whole configuration before
//! returning `EtlError::Configuration`. Lifecycle violations return
//! `EtlError::State` and leave the configuration untouched.

use futures::future::BoxFuture;
use sluice_core::{
    Capability, EmailSpec, FileFormat, Notifications, PipelineState, RunRecord, RunTrigger,
    SinkDescriptor, SinkTarget, SourceDescriptor, TextSpec, resolve,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{DEFAULT_OUTPUT_NAME, EngineConfig};
use crate::context::RunContext;
use crate::driver::{DriverRegistry, Reader, Writer};
use crate::error::{EtlError, Result};
use crate::execution::ExecutionPlan;
use crate::scheduler::{CronScheduler, FiringCallback, ScheduleHandle, Scheduler, validate_cron_shape};
use crate::service::{CompletionDispatcher, CompletionHandle};
use crate::transform::{Transform, TransformChain, TransformSpec};

/// Capacity of the run record broadcast channel
const EVENT_CAPACITY: usize = 64;

/// What `run` did
#[derive(Debug)]
pub struct RunOutcome {
    /// Record of the immediate execution, if one happened
    pub record: Option<RunRecord>,
    /// Number of schedules registered by this call
    pub schedules: usize,
    /// Notifications and successor of the immediate execution, running on
    /// their own task
    pub completion: Option<CompletionHandle>,
}

/// Pipeline to start when this one completes successfully
#[derive(Debug, Clone)]
pub struct Successor {
    pub pipeline: Pipeline,
    pub start_now: bool,
}

/// Handle to a pipeline
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    id: Uuid,
    name: String,
    scheduler: Arc<dyn Scheduler>,
    dispatcher: CompletionDispatcher,
    config: Mutex<PipelineConfig>,
    run_guard: tokio::sync::Mutex<()>,
    events: broadcast::Sender<RunRecord>,
}

struct PipelineConfig {
    source: Option<(SourceDescriptor, Arc<dyn Reader>)>,
    transforms: TransformChain,
    sink: Option<(SinkDescriptor, Arc<dyn Writer>)>,
    plan: Option<Arc<ExecutionPlan>>,
    schedules: Vec<String>,
    handles: Vec<ScheduleHandle>,
    notifications: Notifications,
    successor: Option<Successor>,
    /// Composed, Idle or Terminated once a plan exists
    phase: PipelineState,
    running: bool,
}

impl PipelineConfig {
    fn new() -> Self {
        Self {
            source: None,
            transforms: TransformChain::new(),
            sink: None,
            plan: None,
            schedules: Vec::new(),
            handles: Vec::new(),
            notifications: Notifications::default(),
            successor: None,
            phase: PipelineState::Empty,
            running: false,
        }
    }

    /// Restores the empty configuration, returning handles to cancel
    fn clear(&mut self) -> Vec<ScheduleHandle> {
        let handles = std::mem::take(&mut self.handles);
        *self = Self::new();
        handles
    }

    fn state(&self) -> PipelineState {
        if self.running {
            PipelineState::Running
        } else if self.plan.is_some() {
            self.phase
        } else if self.source.is_some() && self.sink.is_some() {
            PipelineState::Configured
        } else {
            PipelineState::Empty
        }
    }
}

impl Pipeline {
    /// Creates a pipeline with the cron scheduler and logging transports
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_services(
            name,
            Arc::new(CronScheduler::new()),
            CompletionDispatcher::default(),
        )
    }

    /// Creates a pipeline whose notifications go where `config` says
    pub fn from_config(name: impl Into<String>, config: &EngineConfig) -> Self {
        Self::with_services(
            name,
            Arc::new(CronScheduler::new()),
            CompletionDispatcher::from_config(config),
        )
    }

    /// Creates a pipeline with explicit collaborators
    pub fn with_services(
        name: impl Into<String>,
        scheduler: Arc<dyn Scheduler>,
        dispatcher: CompletionDispatcher,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(PipelineInner {
                id: Uuid::new_v4(),
                name: name.into(),
                scheduler,
                dispatcher,
                config: Mutex::new(PipelineConfig::new()),
                run_guard: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn config(&self) -> MutexGuard<'_, PipelineConfig> {
        self.inner
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears the configuration and builds the error to return
    fn reject(&self, mut config: MutexGuard<'_, PipelineConfig>, message: String) -> EtlError {
        let handles = config.clear();
        drop(config);
        self.cancel_handles(&handles);
        warn!(pipeline = %self.name(), "{}; configuration cleared", message);
        EtlError::Configuration(message)
    }

    fn cancel_handles(&self, handles: &[ScheduleHandle]) {
        for handle in handles {
            self.inner.scheduler.cancel(handle);
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Sets the source
    ///
    /// `location` is a file path (resolved by extension) or a connection
    /// string (resolved by scheme). Database sources need `sub_resource`,
    /// the table or collection to read. The underlying system is not touched.
    ///
    /// # Errors
    /// - `EtlError::State` if a source was already accepted
    /// - `EtlError::Configuration` if the location does not match the
    ///   reader's capability or a database source has no sub-resource
    pub fn set_source(
        &self,
        reader: Arc<dyn Reader>,
        location: &str,
        sub_resource: Option<&str>,
    ) -> Result<()> {
        let mut config = self.config();
        if config.source.is_some() {
            return Err(EtlError::state("source is already set; reset first"));
        }

        let capability = match resolve(location) {
            Ok(capability) => capability,
            Err(e) => return Err(self.reject(config, format!("invalid source: {}", e))),
        };

        if capability != reader.capability() {
            return Err(self.reject(
                config,
                format!(
                    "source '{}' is {} but the reader handles {}",
                    location,
                    capability,
                    reader.capability()
                ),
            ));
        }

        let sub_resource = sub_resource.map(str::trim).filter(|s| !s.is_empty());
        if !capability.is_file() && sub_resource.is_none() {
            return Err(self.reject(
                config,
                "database sources require a table or collection name".to_string(),
            ));
        }

        debug!(pipeline = %self.name(), source = %capability, "Source set");
        config.source = Some((
            SourceDescriptor {
                capability,
                location: location.trim().to_string(),
                sub_resource: sub_resource.map(str::to_string),
            },
            reader,
        ));
        Ok(())
    }

    /// Appends transforms in order
    ///
    /// # Errors
    /// `EtlError::State` once the pipeline is composed
    pub fn add_transforms<I>(&self, transforms: I) -> Result<()>
    where
        I: IntoIterator<Item = Transform>,
    {
        let mut config = self.config();
        if config.plan.is_some() {
            return Err(EtlError::state("cannot add transforms after compose"));
        }
        for transform in transforms {
            config.transforms.push(transform);
        }
        Ok(())
    }

    /// Parses and appends named transform specs such as `rename:a=b`
    ///
    /// Either every spec is appended or none is.
    ///
    /// # Errors
    /// - `EtlError::State` once the pipeline is composed
    /// - `EtlError::Configuration` if any spec fails to parse
    pub fn add_transform_specs<I, S>(&self, specs: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let config = self.config();
        if config.plan.is_some() {
            return Err(EtlError::state("cannot add transforms after compose"));
        }

        let mut parsed = Vec::new();
        for spec in specs {
            match TransformSpec::parse(spec.as_ref()) {
                Ok(spec) => parsed.push(Transform::from(spec)),
                Err(e) => return Err(self.reject(config, e.to_string())),
            }
        }
        drop(config);

        self.add_transforms(parsed)
    }

    /// Sets the sink
    ///
    /// For database writers `location` is the connection string and `name`
    /// the table or collection. For file writers `location` is the output
    /// directory (empty means the current directory) and `name` the file
    /// name, which must carry the writer's extension unless it is the
    /// default `etl_output`.
    ///
    /// # Errors
    /// - `EtlError::State` once the pipeline is composed
    /// - `EtlError::Configuration` for any mismatch with the writer
    pub fn set_sink(&self, writer: Arc<dyn Writer>, name: &str, location: &str) -> Result<()> {
        let mut config = self.config();
        if config.plan.is_some() {
            return Err(EtlError::state("cannot change the sink after compose"));
        }

        let capability = writer.capability();
        let name = name.trim();
        let location = location.trim();

        let target = match capability {
            Capability::Database(_) => {
                if location.is_empty() {
                    return Err(self.reject(
                        config,
                        "database sinks require a connection string".to_string(),
                    ));
                }
                match resolve(location) {
                    Ok(found) if found == capability => {}
                    Ok(found) => {
                        return Err(self.reject(
                            config,
                            format!("sink is {} but the writer handles {}", found, capability),
                        ));
                    }
                    Err(e) => return Err(self.reject(config, format!("invalid sink: {}", e))),
                }
                if name.is_empty() {
                    return Err(self.reject(
                        config,
                        "database sinks require a table or collection name".to_string(),
                    ));
                }
                SinkTarget::Database {
                    connection: location.to_string(),
                    collection: name.to_string(),
                }
            }
            Capability::File(format) => {
                if location.contains("://") {
                    return Err(self.reject(
                        config,
                        format!("file sinks need a directory, got '{}'", location),
                    ));
                }
                let file_name = if name.is_empty() || name == DEFAULT_OUTPUT_NAME {
                    format!("{}.{}", DEFAULT_OUTPUT_NAME, format.extension())
                } else {
                    match resolve(name) {
                        Ok(found) if found == capability => name.to_string(),
                        Ok(found) => {
                            return Err(self.reject(
                                config,
                                format!(
                                    "sink file '{}' is {} but the writer handles {}",
                                    name, found, capability
                                ),
                            ));
                        }
                        Err(e) => {
                            return Err(self.reject(config, format!("invalid sink file: {}", e)));
                        }
                    }
                };
                let directory = if location.is_empty() {
                    PathBuf::from(".")
                } else {
                    PathBuf::from(location)
                };
                SinkTarget::File {
                    directory,
                    file_name,
                }
            }
        };

        debug!(pipeline = %self.name(), sink = %capability, "Sink set");
        config.sink = Some((SinkDescriptor { capability, target }, writer));
        Ok(())
    }

    /// Composes the execution plan
    ///
    /// # Errors
    /// `EtlError::State` if already composed or if source or sink is missing
    pub fn compose(&self) -> Result<()> {
        let mut config = self.config();
        if config.plan.is_some() {
            return Err(EtlError::state("pipeline is already composed; reset first"));
        }

        let (source, reader) = config
            .source
            .clone()
            .ok_or_else(|| EtlError::state("cannot compose without a source"))?;
        let (sink, writer) = config
            .sink
            .clone()
            .ok_or_else(|| EtlError::state("cannot compose without a sink"))?;

        let plan = ExecutionPlan::new(source, reader, config.transforms.clone(), sink, writer);
        info!(pipeline = %self.name(), plan = ?plan, "Pipeline composed");

        config.plan = Some(Arc::new(plan));
        config.phase = PipelineState::Composed;
        Ok(())
    }

    /// Resolves drivers from `registry` and composes in one call
    ///
    /// The sink is a file sink when `name` carries a file extension, with
    /// `sink_location` as the output directory; otherwise `sink_location`
    /// must be a connection string and `name` the table or collection.
    /// The default output name with a directory writes `etl_output.<ext>` in
    /// the source's file format, or JSON for database sources.
    pub fn simple(
        &self,
        registry: &DriverRegistry,
        source: &str,
        sub_resource: Option<&str>,
        transforms: Vec<Transform>,
        sink_location: &str,
        name: &str,
    ) -> Result<()> {
        let source_capability = match resolve(source) {
            Ok(capability) => capability,
            Err(e) => return Err(self.reject(self.config(), format!("invalid source: {}", e))),
        };
        let Some(reader) = registry.reader(source_capability) else {
            return Err(self.reject(
                self.config(),
                format!("no reader registered for {}", source_capability),
            ));
        };

        let default_name = name.trim().is_empty() || name.trim() == DEFAULT_OUTPUT_NAME;
        let sink_capability = match resolve(name) {
            Ok(capability @ Capability::File(_)) => Ok(capability),
            _ if default_name && !sink_location.contains("://") => {
                Ok(Capability::File(default_sink_format(source_capability)))
            }
            _ => resolve(sink_location),
        };
        let sink_capability = match sink_capability {
            Ok(capability) => capability,
            Err(e) => {
                return Err(self.reject(
                    self.config(),
                    format!(
                        "sink needs a file name with an extension or a connection string: {}",
                        e
                    ),
                ));
            }
        };
        let Some(writer) = registry.writer(sink_capability) else {
            return Err(self.reject(
                self.config(),
                format!("no writer registered for {}", sink_capability),
            ));
        };

        self.set_source(reader, source, sub_resource)?;
        self.add_transforms(transforms)?;
        self.set_sink(writer, name, sink_location)?;
        self.compose()
    }

    /// Appends cron expressions
    ///
    /// Expressions are normalized to single spaces; duplicates are ignored.
    /// Stops at the first malformed expression, keeping the ones before it.
    ///
    /// # Errors
    /// `EtlError::Configuration` for a malformed expression
    pub fn add_schedule<I, S>(&self, expressions: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = self.config();
        for expression in expressions {
            let expression = expression.as_ref();
            if !validate_cron_shape(expression) {
                return Err(EtlError::configuration(format!(
                    "invalid cron expression '{}'",
                    expression
                )));
            }
            let normalized = expression.split_whitespace().collect::<Vec<_>>().join(" ");
            if !config.schedules.contains(&normalized) {
                config.schedules.push(normalized);
            }
        }
        Ok(())
    }

    /// Stores the completion notifications; nothing is sent here
    pub fn set_notifications(&self, email: Option<EmailSpec>, text: Option<TextSpec>) {
        self.config().notifications = Notifications { email, text };
    }

    /// Starts `next` whenever this pipeline completes successfully
    ///
    /// # Errors
    /// `EtlError::Configuration` if the link would make this pipeline its own
    /// successor, directly or through a cycle
    pub fn chain(&self, next: &Pipeline, start_now: bool) -> Result<()> {
        let mut cursor = Some(next.clone());
        while let Some(pipeline) = cursor {
            if pipeline.id() == self.id() {
                return Err(self.reject(
                    self.config(),
                    format!(
                        "chaining '{}' to '{}' would create a cycle",
                        self.name(),
                        next.name()
                    ),
                ));
            }
            cursor = pipeline.successor().map(|s| s.pipeline);
        }

        info!(pipeline = %self.name(), successor = %next.name(), start_now, "Successor chained");
        self.config().successor = Some(Successor {
            pipeline: next.clone(),
            start_now,
        });
        Ok(())
    }

    /// Restores the empty configuration and cancels registered schedules
    pub fn reset(&self) {
        let handles = self.config().clear();
        self.cancel_handles(&handles);
        info!(pipeline = %self.name(), cancelled = handles.len(), "Pipeline reset");
    }

    /// Cancels every schedule registered by `run`
    ///
    /// A firing already in progress completes.
    pub fn cancel_schedules(&self) -> usize {
        let handles = {
            let mut config = self.config();
            let handles = std::mem::take(&mut config.handles);
            if config.phase == PipelineState::Idle {
                config.phase = PipelineState::Terminated;
            }
            handles
        };
        self.cancel_handles(&handles);
        if !handles.is_empty() {
            info!(pipeline = %self.name(), cancelled = handles.len(), "Schedules cancelled");
        }
        handles.len()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn state(&self) -> PipelineState {
        self.config().state()
    }

    pub fn is_composed(&self) -> bool {
        self.config().plan.is_some()
    }

    pub fn source(&self) -> Option<SourceDescriptor> {
        self.config().source.as_ref().map(|(d, _)| d.clone())
    }

    pub fn sink(&self) -> Option<SinkDescriptor> {
        self.config().sink.as_ref().map(|(d, _)| d.clone())
    }

    pub fn transform_count(&self) -> usize {
        self.config().transforms.len()
    }

    pub fn schedules(&self) -> Vec<String> {
        self.config().schedules.clone()
    }

    /// Number of schedule handles currently registered
    pub fn active_schedules(&self) -> usize {
        self.config().handles.len()
    }

    pub fn notifications(&self) -> Notifications {
        self.config().notifications.clone()
    }

    pub fn successor(&self) -> Option<Successor> {
        self.config().successor.clone()
    }

    /// Receives a [`RunRecord`] for every finished run, successful or not
    pub fn subscribe(&self) -> broadcast::Receiver<RunRecord> {
        self.inner.events.subscribe()
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Runs the composed pipeline
    ///
    /// Without schedules the plan executes exactly once. With schedules one
    /// handle is registered per expression (replacing handles from a previous
    /// call) and the plan executes once right away if `start_immediately`.
    ///
    /// # Errors
    /// - `EtlError::State` if the pipeline was never composed
    /// - `EtlError::Configuration` if the scheduler rejects an expression
    /// - `EtlError::Execution` if the immediate execution fails
    pub fn run(&self, start_immediately: bool) -> BoxFuture<'static, Result<RunOutcome>> {
        self.run_triggered(start_immediately, RunTrigger::Manual)
    }

    /// `run` on behalf of a completed predecessor
    pub(crate) fn run_as_successor(
        &self,
        start_immediately: bool,
        predecessor: Uuid,
    ) -> BoxFuture<'static, Result<RunOutcome>> {
        self.run_triggered(start_immediately, RunTrigger::Successor(predecessor))
    }

    fn run_triggered(
        &self,
        start_immediately: bool,
        trigger: RunTrigger,
    ) -> BoxFuture<'static, Result<RunOutcome>> {
        let pipeline = self.clone();
        Box::pin(async move {
            let (schedules, previous) = {
                let mut config = pipeline.config();
                if config.plan.is_none() {
                    return Err(EtlError::state("pipeline must be composed before run"));
                }
                (config.schedules.clone(), std::mem::take(&mut config.handles))
            };
            pipeline.cancel_handles(&previous);

            let mut handles = Vec::with_capacity(schedules.len());
            for expression in &schedules {
                let callback = pipeline.firing_callback(expression.clone());
                match pipeline.inner.scheduler.schedule(expression, callback) {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        pipeline.cancel_handles(&handles);
                        return Err(e);
                    }
                }
            }

            let registered = handles.len();
            {
                let mut config = pipeline.config();
                config.handles = handles;
                if registered > 0 {
                    config.phase = PipelineState::Idle;
                }
            }

            if registered > 0 {
                info!(pipeline = %pipeline.name(), schedules = registered, "Schedules registered");
            }

            if registered > 0 && !start_immediately {
                return Ok(RunOutcome {
                    record: None,
                    schedules: registered,
                    completion: None,
                });
            }

            let (record, completion) = pipeline.execute(trigger).await?;
            Ok(RunOutcome {
                record: Some(record),
                schedules: registered,
                completion,
            })
        })
    }

    fn firing_callback(&self, expression: String) -> FiringCallback {
        let inner: Weak<PipelineInner> = Arc::downgrade(&self.inner);
        Arc::new(move || {
            let inner = inner.clone();
            let expression = expression.clone();
            let firing: BoxFuture<'static, ()> = Box::pin(async move {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let pipeline = Pipeline { inner };
                if let Err(e) = pipeline.execute(RunTrigger::Scheduled(expression)).await {
                    debug!(pipeline = %pipeline.name(), error = %e, "Scheduled run did not succeed");
                }
            });
            firing
        })
    }

    /// Executes the plan once under the run guard
    async fn execute(&self, trigger: RunTrigger) -> Result<(RunRecord, Option<CompletionHandle>)> {
        let guard = self.inner.run_guard.lock().await;

        let plan = {
            let mut config = self.config();
            let plan = config
                .plan
                .clone()
                .ok_or_else(|| EtlError::state("pipeline is no longer composed"))?;
            config.running = true;
            plan
        };

        let mut ctx = RunContext::new(self.id(), self.name(), trigger.clone());
        info!(
            pipeline = %self.name(),
            run_id = %ctx.run_id(),
            trigger = ?trigger,
            "Run started"
        );

        let result = plan.execute(&mut ctx).await;

        let (notifications, successor) = {
            let mut config = self.config();
            config.running = false;
            if config.plan.is_some() {
                config.phase = if config.handles.is_empty() {
                    PipelineState::Terminated
                } else {
                    PipelineState::Idle
                };
            }
            (config.notifications.clone(), config.successor.clone())
        };
        drop(guard);

        match result {
            Ok(()) => {
                let record = ctx.succeed();
                info!(
                    pipeline = %self.name(),
                    run_id = %record.run_id,
                    batches = record.batches_written,
                    records = record.records_written,
                    "Run succeeded"
                );
                let _ = self.inner.events.send(record.clone());

                let completion = self
                    .inner
                    .dispatcher
                    .on_complete(notifications, successor, self.id());
                Ok((record, completion))
            }
            Err(e) => {
                let record = ctx.fail(e.to_string());
                error!(
                    pipeline = %self.name(),
                    run_id = %record.run_id,
                    batches = record.batches_written,
                    error = %e,
                    "Run failed"
                );
                let _ = self.inner.events.send(record);
                Err(e.into())
            }
        }
    }
}

/// File format of a default-named sink
fn default_sink_format(source: Capability) -> FileFormat {
    match source {
        Capability::File(format) => format,
        Capability::Database(_) => FileFormat::Json,
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}
