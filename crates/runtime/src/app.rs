//! The app: process-level host of engines. It owns the listening endpoint,
//! dispatches inbound connections to engines (migration), starts and stops
//! graphs, and runs the top of the close cascade. The embedding host talks
//! to it through [`App`].

use crate::connection::{Connection, ConnectionEvents, ConnectionId};
use crate::engine::{self, EngineHandle, EngineState, ResultSink};
use crate::protocol::{Acceptor, Listener, Protocol, ProtocolEvents};
use crate::runloop::{self, Handle};
use crate::telemetry::Telemetry;
use crate::{Error, ErrorCode, Result};
use indexmap::IndexMap;
use message::{Body, Message, MsgType, SharedMessage, StatusCode};
use models::{AppConfig, PermissiveSchema, SchemaValidator};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Environment variable naming an override for the app's base directory
/// when locating addon metadata.
pub const ENV_APP_BASE_DIR: &str = "WEFT_APP_BASE_DIR";
/// When set, addons stay registered after an app closes. For processes
/// hosting several apps in sequence, such as test harnesses.
pub const ENV_DISABLE_ADDON_UNREGISTER: &str = "WEFT_DISABLE_ADDON_UNREGISTER_AFTER_APP_CLOSE";

pub struct AppOptions {
    pub config: AppConfig,
    pub schema: Arc<dyn SchemaValidator>,
    /// Unregister extension addons when this app finishes closing.
    /// Defaults from the absence of [`ENV_DISABLE_ADDON_UNREGISTER`].
    pub unregister_addons_on_close: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            schema: Arc::new(PermissiveSchema),
            unregister_addons_on_close: std::env::var(ENV_DISABLE_ADDON_UNREGISTER).is_err(),
        }
    }
}

impl AppOptions {
    pub fn with_config(config: AppConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }
}

/// A running app. Submit built-in commands (start_graph, stop_graph,
/// close_app) or graph-addressed messages with [`App::submit`], then
/// [`App::wait`] for the exit code.
pub struct App {
    handle: Handle<AppState>,
    exit: oneshot::Receiver<i32>,
}

impl App {
    pub fn start(options: AppOptions) -> Result<App> {
        let (exit_tx, exit_rx) = oneshot::channel();
        let config = Arc::new(options.config);
        let uri = config.uri.clone();
        let schema = options.schema;
        let unregister = options.unregister_addons_on_close;

        let handle = runloop::spawn("app", move |handle: &Handle<AppState>| AppState {
            uri,
            config,
            schema,
            handle: handle.clone(),
            telemetry: Telemetry::new(),
            engines: IndexMap::new(),
            predefined_running: HashMap::new(),
            connections: HashMap::new(),
            next_connection: Arc::new(AtomicU64::new(1)),
            listener: None,
            closing: false,
            exit_code: 0,
            exit_tx: Some(exit_tx),
            unregister_addons: unregister,
        });
        handle.post(|state: &mut AppState| state.bootstrap());

        Ok(App {
            handle,
            exit: exit_rx,
        })
    }

    /// Send one message to the app. The returned channel yields every
    /// result produced for it (at most one final).
    pub fn submit(&self, msg: Message) -> mpsc::UnboundedReceiver<SharedMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let msg = SharedMessage::new(msg);
        self.handle
            .post(move |state: &mut AppState| state.on_external(msg, tx));
        rx
    }

    /// Ask the app to close, as if a close_app command arrived.
    pub fn close(&self) {
        self.handle.post(|state: &mut AppState| state.begin_close(0));
    }

    /// Block until the app has fully closed; returns the exit code
    /// (0 for a normal close).
    pub fn wait(self) -> i32 {
        self.exit.blocking_recv().unwrap_or(0)
    }
}

pub(crate) struct AppState {
    uri: String,
    config: Arc<AppConfig>,
    schema: Arc<dyn SchemaValidator>,
    handle: Handle<AppState>,
    telemetry: Arc<Telemetry>,
    engines: IndexMap<String, EngineHandle>,
    // Running singleton predefined graphs, by predefined name.
    predefined_running: HashMap<String, String>,
    connections: HashMap<ConnectionId, AppConnection>,
    next_connection: Arc<AtomicU64>,
    listener: Option<Box<dyn Listener>>,
    closing: bool,
    exit_code: i32,
    exit_tx: Option<oneshot::Sender<i32>>,
    unregister_addons: bool,
}

struct AppConnection {
    /// The owned protocol half; taken when the connection migrates.
    connection: Option<Connection>,
    events: Arc<ConnectionEvents>,
    /// The engine this connection migrated to, if it has.
    engine: Option<EngineHandle>,
}

impl AppState {
    fn bootstrap(&mut self) {
        if let Err(err) = crate::addon::registry().run_loaders() {
            tracing::error!(%err, "addon loader failed");
        }

        if !self.uri.is_empty() {
            match self.listen() {
                Ok(listener) => {
                    tracing::info!(uri = %self.uri, "app listening");
                    self.listener = Some(listener);
                }
                Err(err) => {
                    tracing::error!(uri = %self.uri, %err, "failed to listen; closing app");
                    self.begin_close(1);
                    return;
                }
            }
        }

        let auto_start: Vec<String> = self
            .config
            .predefined_graphs
            .iter()
            .filter(|predefined| predefined.auto_start)
            .map(|predefined| predefined.name.clone())
            .collect();
        for name in auto_start {
            let mut cmd = Message::start_graph(message::StartGraphBody {
                predefined_graph_name: name,
                ..Default::default()
            });
            cmd.set_src(message::Location::new(self.uri.clone(), "", "", ""));
            self.start_graph(SharedMessage::new(cmd), ResultSink::Engine);
        }
    }

    fn listen(&mut self) -> Result<Box<dyn Listener>> {
        let parsed = url::Url::parse(&self.uri)
            .map_err(|err| Error::protocol(format!("app uri '{}': {err}", self.uri)))?;
        let addon = crate::addon::registry().protocol_addon(parsed.scheme())?;

        let handle = self.handle.clone();
        let next = self.next_connection.clone();
        let acceptor: Acceptor = Arc::new(move |protocol: Box<dyn Protocol>| {
            let id = ConnectionId(next.fetch_add(1, Ordering::Relaxed));
            let events = Arc::new(ConnectionEvents::new(id, handle.clone()));

            let connection = Connection { id, protocol };
            let register = events.clone();
            handle.post(move |state: &mut AppState| {
                state.register_connection(connection, register)
            });

            events as Arc<dyn ProtocolEvents>
        });

        addon.listen(&self.uri, acceptor)
    }

    fn register_connection(&mut self, connection: Connection, events: Arc<ConnectionEvents>) {
        tracing::debug!(id = %connection.id, "accepted connection");
        self.connections.insert(
            connection.id,
            AppConnection {
                connection: Some(connection),
                events,
                engine: None,
            },
        );
    }

    /// One inbound message from a connection still owned by the app. The
    /// first message which names an engine triggers migration.
    pub(crate) fn on_inbound(&mut self, id: ConnectionId, msg: SharedMessage) {
        if self.closing {
            return;
        }
        let Some(entry) = self.connections.get_mut(&id) else {
            tracing::debug!(%id, "message for a gone connection");
            return;
        };

        // Messages which raced the migration window forward in app-queue
        // order; the engine was adopted ahead of them.
        if let Some(engine) = entry.engine.clone() {
            engine.post(move |state: &mut EngineState| state.on_inbound(id, msg));
            return;
        }

        let engine = match msg.get().msg_type() {
            MsgType::StartGraph => {
                let graph_id = Uuid::new_v4().to_string();
                Some(self.spawn_engine(&graph_id))
            }
            MsgType::CloseApp => {
                self.reply_over_connection(id, &msg, StatusCode::Ok, None, "closing");
                self.begin_close(0);
                return;
            }
            _ => {
                let graph_id = msg
                    .get()
                    .dests()
                    .first()
                    .map(|loc| loc.graph_id.clone())
                    .unwrap_or_default();
                self.engines.get(&graph_id).cloned()
            }
        };

        let Some(engine) = engine else {
            tracing::warn!(%id, "inbound message names no running graph");
            self.reply_over_connection(
                id,
                &msg,
                StatusCode::Error,
                Some(ErrorCode::MsgNotConnected),
                "no running graph for destination",
            );
            return;
        };

        // Migrate: the engine takes the connection, then this message, then
        // anything queued behind us, then anything buffered meanwhile.
        let entry = self.connections.get_mut(&id).expect("entry looked up above");
        entry.events.begin_migration();
        entry.engine = Some(engine.clone());

        let connection = entry
            .connection
            .take()
            .expect("an unmigrated connection owns its protocol");
        engine.post(move |state: &mut EngineState| state.adopt_connection(connection));
        engine.post(move |state: &mut EngineState| state.on_inbound(id, msg));

        let events = entry.events.clone();
        self.handle.post(move |_state: &mut AppState| {
            events.attach_engine(engine);
        });
    }

    fn reply_over_connection(
        &mut self,
        id: ConnectionId,
        msg: &SharedMessage,
        status: StatusCode,
        code: Option<ErrorCode>,
        detail: &str,
    ) {
        if !msg.get().msg_type().is_cmd_like() {
            return;
        }
        let Some(entry) = self.connections.get_mut(&id) else {
            return;
        };
        let Some(connection) = entry.connection.as_mut() else {
            return;
        };
        let Ok(mut result) = Message::cmd_result(status, msg.get()) else {
            return;
        };
        if let Some(body) = result.result_mut() {
            body.error_code = code;
            body.detail = value::Value::from(detail);
        }
        match message::wire::encode(&result) {
            Ok(bytes) => {
                if let Err(err) = connection.protocol.send(bytes) {
                    tracing::warn!(%id, %err, "failed to reply over connection");
                }
            }
            Err(err) => tracing::warn!(%id, %err, "unserializable reply"),
        }
    }

    pub(crate) fn connection_closed(&mut self, id: ConnectionId) {
        tracing::debug!(%id, "connection closed");
        self.connections.remove(&id);
    }

    /// A message submitted by the embedding host.
    fn on_external(&mut self, msg: SharedMessage, tx: mpsc::UnboundedSender<SharedMessage>) {
        if self.closing {
            self.reply_external(&msg, &tx, ErrorCode::AppClosed, "app is closing");
            return;
        }

        match msg.get().msg_type() {
            MsgType::StartGraph => self.start_graph(msg, ResultSink::External(tx)),
            MsgType::StopGraph => {
                let Body::StopGraph(_, graph_id) = msg.get().body() else {
                    return;
                };
                match self.engines.get(graph_id).cloned() {
                    Some(engine) => {
                        engine
                            .post(move |state: &mut EngineState| {
                                state.route(msg, ResultSink::External(tx))
                            });
                    }
                    None => self.reply_external(
                        &msg,
                        &tx,
                        ErrorCode::InvalidArgument,
                        "no engine runs that graph",
                    ),
                }
            }
            MsgType::CloseApp => {
                self.reply_external_ok(&msg, &tx, "closing");
                self.begin_close(0);
            }
            _ => {
                let graph_id = msg
                    .get()
                    .dests()
                    .first()
                    .map(|loc| loc.graph_id.clone())
                    .unwrap_or_default();
                match self.engines.get(&graph_id).cloned() {
                    Some(engine) => engine.post(move |state: &mut EngineState| {
                        state.route(msg, ResultSink::External(tx))
                    }),
                    None => self.reply_external(
                        &msg,
                        &tx,
                        ErrorCode::MsgNotConnected,
                        "no engine runs that graph",
                    ),
                }
            }
        }
    }

    fn start_graph(&mut self, cmd: SharedMessage, origin: ResultSink) {
        let Body::StartGraph(_, body) = cmd.get().body() else {
            return;
        };

        // A running singleton predefined graph is acknowledged, not
        // duplicated.
        let predefined_name = body.predefined_graph_name.clone();
        if !predefined_name.is_empty() {
            match self.config.predefined_graph(&predefined_name) {
                Some(predefined) => {
                    if predefined.singleton {
                        if let Some(graph_id) = self.predefined_running.get(&predefined_name) {
                            let graph_id = graph_id.clone();
                            self.reply_start_ok(&cmd, origin, &graph_id);
                            return;
                        }
                    }
                }
                None => {
                    self.reply_start_error(
                        &cmd,
                        origin,
                        format!("no predefined graph '{predefined_name}'"),
                    );
                    return;
                }
            }
        }

        let graph_id = Uuid::new_v4().to_string();
        let engine = self.spawn_engine(&graph_id);
        if !predefined_name.is_empty() {
            self.predefined_running
                .insert(predefined_name, graph_id.clone());
        }
        engine.post(move |state: &mut EngineState| state.route(cmd, origin));
    }

    fn spawn_engine(&mut self, graph_id: &str) -> EngineHandle {
        let engine = engine::spawn(
            graph_id.to_string(),
            self.uri.clone(),
            self.config.clone(),
            self.schema.clone(),
            Some(self.handle.clone()),
            self.telemetry.clone(),
        );
        self.engines.insert(graph_id.to_string(), engine.clone());
        engine
    }

    fn reply_start_ok(&mut self, cmd: &SharedMessage, origin: ResultSink, graph_id: &str) {
        match origin {
            ResultSink::External(tx) => {
                if let Ok(mut result) = Message::cmd_result(StatusCode::Ok, cmd.get()) {
                    if let Some(body) = result.result_mut() {
                        body.detail = value::Value::from(graph_id);
                    }
                    let _ = tx.send(SharedMessage::new(result));
                }
            }
            _ => tracing::debug!(%graph_id, "predefined graph already running"),
        }
    }

    fn reply_start_error(&mut self, cmd: &SharedMessage, origin: ResultSink, detail: String) {
        match origin {
            ResultSink::External(tx) => {
                if let Ok(mut result) = Message::cmd_result(StatusCode::Error, cmd.get()) {
                    if let Some(body) = result.result_mut() {
                        body.error_code = Some(ErrorCode::InvalidGraph);
                        body.detail = value::Value::from(detail);
                    }
                    let _ = tx.send(SharedMessage::new(result));
                }
            }
            _ => tracing::error!(%detail, "failed to start predefined graph"),
        }
    }

    fn reply_external(
        &mut self,
        msg: &SharedMessage,
        tx: &mpsc::UnboundedSender<SharedMessage>,
        code: ErrorCode,
        detail: &str,
    ) {
        if !msg.get().msg_type().is_cmd_like() {
            return;
        }
        if let Ok(mut result) = Message::cmd_result(StatusCode::Error, msg.get()) {
            if let Some(body) = result.result_mut() {
                body.error_code = Some(code);
                body.detail = value::Value::from(detail);
            }
            let _ = tx.send(SharedMessage::new(result));
        }
    }

    fn reply_external_ok(
        &mut self,
        msg: &SharedMessage,
        tx: &mpsc::UnboundedSender<SharedMessage>,
        detail: &str,
    ) {
        if let Ok(mut result) = Message::cmd_result(StatusCode::Ok, msg.get()) {
            if let Some(body) = result.result_mut() {
                body.detail = value::Value::from(detail);
            }
            let _ = tx.send(SharedMessage::new(result));
        }
    }

    /// An engine has fully closed.
    pub(crate) fn engine_closed(&mut self, graph_id: &str) {
        self.engines.shift_remove(graph_id);
        self.predefined_running
            .retain(|_, running| running != graph_id);

        if self.closing && self.engines.is_empty() {
            self.finish_close();
        }
    }

    /// Top of the close cascade: stop accepting, close engines, and exit
    /// with `code` once everything below has reported closed.
    pub(crate) fn begin_close(&mut self, code: i32) {
        if self.closing {
            return;
        }
        tracing::info!(code, "app closing");
        self.closing = true;
        self.exit_code = code;

        if let Some(mut listener) = self.listener.take() {
            listener.close();
        }
        for entry in self.connections.values_mut() {
            if let Some(connection) = entry.connection.as_mut() {
                connection.protocol.close();
            }
        }

        if self.engines.is_empty() {
            self.finish_close();
            return;
        }
        for engine in self.engines.values() {
            engine.post(|state: &mut EngineState| state.close(None));
        }
    }

    fn finish_close(&mut self) {
        tracing::info!(code = self.exit_code, "app closed");

        if self.unregister_addons {
            crate::addon::registry().unregister_kind(models::AddonKind::Extension);
        }
        if let Some(exit_tx) = self.exit_tx.take() {
            let _ = exit_tx.send(self.exit_code);
        }
        self.handle.shutdown();
    }
}
