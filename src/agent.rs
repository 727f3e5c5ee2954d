//! Agent wiring and run loop
//!
//! [`EdgeAgent`] owns the connection session, the dispatch table, the
//! periodic scheduler and the optional status sink, and runs the single
//! cooperative loop that consumes session notices in arrival order. All
//! handler dispatch happens on this loop, so the handler tables never see
//! concurrent access from the network task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{ConfigError, EdgeConfig};
use crate::error::{EdgeResult, TransportError};
use crate::scheduler::{PeriodicScheduler, TaskCallback, TaskSet};
use crate::session::client::MqttSession;
use crate::session::dispatch::{DispatchTable, FilterError, MessageHandler};
use crate::session::events::SessionNotice;
use crate::session::Session;
use crate::status::StatusSink;
use crate::transport::MqttTransport;

/// Invoked once the broker has acknowledged the session and the
/// subscription replay has finished.
pub type ConnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Invoked when an established session is lost.
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Cloneable handle that asks the run loop to stop. Safe to fire from any
/// context, including a status sink's exit trigger.
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: mpsc::Sender<()>,
}

impl ShutdownTrigger {
    pub fn fire(&self) {
        let _ = self.tx.try_send(());
    }
}

/// The edge client: session, dispatch, scheduler, and the run loop that
/// ties them together.
pub struct EdgeAgent {
    config: EdgeConfig,
    session: MqttSession,
    dispatch: DispatchTable,
    tasks: TaskSet,
    scheduler: PeriodicScheduler,
    sink: Option<Arc<dyn StatusSink>>,
    connect_handler: Option<ConnectHandler>,
    disconnect_handler: Option<DisconnectHandler>,
    notices: Option<mpsc::Receiver<SessionNotice>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Option<mpsc::Receiver<()>>,
}

impl EdgeAgent {
    /// Build the agent. Configuration problems surface here, before any
    /// network or scheduler activity.
    pub fn new(config: EdgeConfig) -> Result<Self, ConfigError> {
        let (session, notices) = MqttSession::new(&config)?;
        let tasks = TaskSet::new();
        let scheduler = PeriodicScheduler::new(&tasks);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Ok(Self {
            config,
            session,
            dispatch: DispatchTable::new(),
            tasks,
            scheduler,
            sink: None,
            connect_handler: None,
            disconnect_handler: None,
            notices: Some(notices),
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
        })
    }

    /// Session handle for publishing and subscribing from handlers and
    /// periodic tasks. Stays valid across reconnects.
    pub fn session(&self) -> Session<MqttTransport> {
        self.session.handle()
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Register the handler invoked after every successful (re)connect.
    /// Only the last registered handler is kept.
    pub fn register_connect_handler(&mut self, handler: impl Fn() + Send + Sync + 'static) {
        self.connect_handler = Some(Arc::new(handler));
    }

    /// Register the handler invoked when the session is lost.
    pub fn register_disconnect_handler(&mut self, handler: impl Fn() + Send + Sync + 'static) {
        self.disconnect_handler = Some(Arc::new(handler));
    }

    /// Register a handler for messages matching a topic filter. The filter
    /// still needs a subscription before the broker delivers anything.
    pub fn register_topic_handler(
        &mut self,
        filter: impl Into<String>,
        handler: MessageHandler,
    ) -> Result<(), FilterError> {
        self.dispatch.register(filter, handler)
    }

    /// Register the handler for messages no topic filter matches.
    pub fn register_fallback_handler(&mut self, handler: MessageHandler) {
        self.dispatch.set_fallback(handler);
    }

    /// Register a named periodic task. Registering a name again overwrites
    /// the earlier definition; `interval: None` defines the task without
    /// ever scheduling it.
    pub fn register_periodic_task(
        &mut self,
        name: impl Into<String>,
        interval: Option<Duration>,
        callback: TaskCallback,
    ) {
        self.tasks.register(name, interval, callback);
    }

    /// Attach a status sink, initialized when the run loop starts.
    pub fn attach_sink(&mut self, sink: Arc<dyn StatusSink>) {
        self.sink = Some(sink);
    }

    /// Connect, start the timers, and block processing session notices
    /// until a shutdown trigger, SIGINT or SIGTERM arrives.
    ///
    /// An initial connect failure is reported and the loop still runs: the
    /// reconnect supervisor keeps retrying with bounded backoff.
    pub async fn run(&mut self) -> EdgeResult<()> {
        let mut notices = self
            .notices
            .take()
            .ok_or_else(|| TransportError::invalid("run loop already consumed"))?;
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| TransportError::invalid("run loop already consumed"))?;

        info!(device = %self.config.device.id, "starting edge agent");

        match self.session.connect().await {
            Ok(()) => info!("connected to broker"),
            Err(err) => error!(
                code = %err.code,
                "initial connect failed: {}; reconnect supervisor keeps retrying",
                err.detail
            ),
        }

        self.scheduler = PeriodicScheduler::new(&self.tasks);

        if let Some(sink) = self.sink.clone() {
            match sink.init() {
                Ok(()) => self.scheduler.attach_sink(sink),
                Err(err) => {
                    error!("status sink init failed: {err}; continuing without display");
                    self.sink = None;
                }
            }
        }

        self.scheduler.start();

        // SIGTERM is forwarded through the shutdown trigger so the select
        // below only needs one extra arm for ctrl-c.
        #[cfg(unix)]
        {
            let trigger = self.shutdown_trigger();
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::spawn(async move {
                        sigterm.recv().await;
                        trigger.fire();
                    });
                }
                Err(err) => warn!("SIGTERM handler unavailable: {err}"),
            }
        }

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                notice = notices.recv() => match notice {
                    Some(notice) => self.handle_notice(notice).await,
                    None => {
                        warn!("session notice channel closed");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("shutdown requested");
                    break;
                }
                _ = &mut ctrl_c => {
                    info!("interrupt received, shutting down");
                    break;
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Stop the timers and the network session. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.scheduler.stop();
        self.session.stop().await;
    }

    async fn handle_notice(&self, notice: SessionNotice) {
        match notice {
            SessionNotice::Connected => {
                if let Some(handler) = &self.connect_handler {
                    handler();
                }
                if let Some(sink) = &self.sink {
                    sink.connection_changed(true);
                }
            }
            SessionNotice::Disconnected { reason } => {
                warn!("session lost: {reason}");
                if let Some(handler) = &self.disconnect_handler {
                    handler();
                }
                if let Some(sink) = &self.sink {
                    sink.connection_changed(false);
                }
            }
            SessionNotice::Message(message) => {
                self.dispatch.dispatch(message).await;
            }
        }
    }
}
