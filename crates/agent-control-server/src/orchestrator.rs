//! Server lifecycle: handler gate, transport startup and connection routing.

use std::{
    fmt,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
};

use agent_control_core::{Connection, Handler, TransportError};
use agent_control_modules::{ArgsError, ModuleCatalog, ModuleContext, split_command_line};
use agent_control_session::{JobId, JobRegistry, NewJob, SessionFactory, SessionRegistry};
use agent_control_transport::{ConnectionEvent, TransportRegistry};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::config::ServerConfig;

/// Server error.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown transport profile: {0}")]
    UnknownTransport(String),
    #[error("Server already started")]
    AlreadyStarted,
    #[error("Server task failed: {0}")]
    Crashed(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Job submission error.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Args(#[from] ArgsError),
    #[error("No session matches {0:?}")]
    NoTargets(String),
    #[error("Module {module} runs on at most {max} session(s), {matched} matched")]
    TooManySessions {
        module: String,
        max: usize,
        matched: usize,
    },
}

/// Lifecycle state of a [`ServerOrchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    WaitingForHandler,
    Listening,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::WaitingForHandler => "waiting for handler",
            Self::Listening => "listening",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Owns the registries and drives the transport for one listener.
///
/// Nothing is bound until a [`Handler`] has been registered, so every
/// session event has somewhere to go.
pub struct ServerOrchestrator {
    config: ServerConfig,
    transports: TransportRegistry,
    sessions: Arc<SessionRegistry>,
    jobs: Arc<JobRegistry>,
    catalog: Arc<ModuleCatalog>,
    factory: SessionFactory,
    handler: watch::Sender<Option<Arc<dyn Handler>>>,
    state: watch::Sender<ServerState>,
    local_addr: Mutex<Option<SocketAddr>>,
    task: Mutex<Option<JoinHandle<Result<(), ServerError>>>>,
}

impl ServerOrchestrator {
    /// Create an orchestrator in the `Created` state.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        transports: TransportRegistry,
        sessions: Arc<SessionRegistry>,
        catalog: Arc<ModuleCatalog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            transports,
            sessions,
            jobs: Arc::new(JobRegistry::new()),
            catalog,
            factory: SessionFactory::new(),
            handler: watch::Sender::new(None),
            state: watch::Sender::new(ServerState::Created),
            local_addr: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Live sessions.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Recorded jobs.
    #[must_use]
    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    /// Loaded modules.
    #[must_use]
    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        &self.catalog
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Address the listener is bound to, once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until the server reaches `target` or stops, returning the state seen.
    pub async fn wait_for_state(&self, target: ServerState) -> ServerState {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        rx.wait_for(|s| *s == target || *s == ServerState::Stopped)
            .await
            .map_or(ServerState::Stopped, |s| *s)
    }

    /// Register the display handler and release the startup gate.
    ///
    /// Only the first registration takes effect; later calls return `false`.
    pub fn register_handler(&self, handler: Arc<dyn Handler>) -> bool {
        let mut accepted = false;
        self.handler.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(Arc::clone(&handler));
            accepted = true;
            true
        });
        if accepted {
            self.sessions.attach_handler(handler);
            tracing::debug!("Handler registered");
        } else {
            tracing::warn!("Handler already registered, ignoring");
        }
        accepted
    }

    /// Spawn the server task.
    ///
    /// # Errors
    /// Returns `AlreadyStarted` if the task was spawned before.
    pub fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return Err(ServerError::AlreadyStarted);
        }
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let _stopped = MarkStopped(Arc::clone(&this));
            let result = this.run().await;
            if let Err(e) = &result {
                tracing::error!("Server stopped: {e}");
            }
            result
        }));
        Ok(())
    }

    /// Abort the server task. Live sessions stay registered.
    pub fn stop(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.state.send_replace(ServerState::Stopped);
        tracing::info!("Server stopped");
    }

    /// Wait for the server task to finish and return its outcome.
    ///
    /// # Errors
    /// Returns the error the server task stopped with.
    pub async fn join(&self) -> Result<(), ServerError> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => {
                    tracing::error!("Server task panicked: {e}");
                    Err(ServerError::Crashed(e.to_string()))
                }
            },
            None => Ok(()),
        }
    }

    async fn run(self: Arc<Self>) -> Result<(), ServerError> {
        self.state.send_replace(ServerState::WaitingForHandler);
        let mut gate = self.handler.subscribe();
        let released = gate.wait_for(Option::is_some).await.is_ok();
        if !released {
            return Ok(());
        }

        let profile = self
            .transports
            .get(&self.config.transport)
            .ok_or_else(|| ServerError::UnknownTransport(self.config.transport.clone()))?;
        let options = profile.server_options(&self.config.address, self.config.port);
        let server = profile.server.bind(options).await?;

        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = server.local_addr();
        self.state.send_replace(ServerState::Listening);
        tracing::info!(
            transport = %self.config.transport,
            addr = ?server.local_addr(),
            "Server listening"
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let serve = server.serve(tx);
        tokio::pin!(serve);

        loop {
            tokio::select! {
                result = &mut serve => {
                    result?;
                    return Ok(());
                }
                Some(event) = rx.recv() => self.route(event),
            }
        }
    }

    fn route(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Accepted(connection) => {
                tracing::debug!(connection_id = %connection.id(), "Connection accepted");
                let sessions = Arc::clone(&self.sessions);
                let factory = self.factory;
                tokio::spawn(async move {
                    open_session(factory, &sessions, connection).await;
                });
            }
            ConnectionEvent::Closed(connection) => {
                self.sessions.remove_session(&connection);
            }
        }
    }

    /// Validate and record a job for the sessions matching `target_query`.
    ///
    /// `module_path` may be a bare module name or a category path.
    ///
    /// # Errors
    /// Returns error if the module is unknown, the arguments do not fit its
    /// schema, no session matches, or more sessions match than the module
    /// accepts.
    pub fn submit_job(
        &self,
        module_path: &str,
        arg_line: &str,
        target_query: &str,
    ) -> Result<JobId, JobError> {
        let name = self.catalog.resolve_category_path(module_path);
        let module = self.catalog.resolve(&name).map_err(ArgsError::from)?;
        let args = split_command_line(arg_line).map_err(ArgsError::from)?;
        self.catalog.parse_args(&name, &args)?;

        let targets = self.sessions.search(target_query);
        if targets.is_empty() {
            return Err(JobError::NoTargets(target_query.to_string()));
        }
        let instance = module.instantiate(ModuleContext {
            connections: targets.iter().map(|s| Arc::clone(s.connection())).collect(),
        });
        if let Some(max) = instance.max_sessions().filter(|max| targets.len() > *max) {
            return Err(JobError::TooManySessions {
                module: name,
                max,
                matched: targets.len(),
            });
        }

        let sessions: Vec<_> = targets.iter().map(|s| s.id()).collect();
        let id = self.jobs.add_job(NewJob {
            module: name.clone(),
            args,
            sessions,
        });
        tracing::info!(job_id = id, module = %name, sessions = targets.len(), "Job submitted");
        Ok(id)
    }
}

/// Moves the server to `Stopped` when the server task ends, however it ends.
struct MarkStopped(Arc<ServerOrchestrator>);

impl Drop for MarkStopped {
    fn drop(&mut self) {
        self.0.state.send_replace(ServerState::Stopped);
    }
}

async fn open_session(
    factory: SessionFactory,
    sessions: &SessionRegistry,
    connection: Arc<dyn Connection>,
) {
    let descriptor = match factory.handshake(connection.as_ref()).await {
        Ok(descriptor) => descriptor,
        Err(e) => {
            tracing::warn!(connection_id = %connection.id(), "Handshake failed: {e}");
            connection.close().await;
            return;
        }
    };
    sessions.add_session(descriptor, Arc::clone(&connection)).await;
    // The close event may have been routed before the session existed.
    if connection.is_closed() {
        sessions.remove_session(&connection);
    }
}
