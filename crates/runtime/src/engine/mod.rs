//! The engine: one runloop per running graph. It owns the routing table,
//! the path store, the remotes map, and the groups hosting the graph's
//! extensions, and it drives the start-graph and close state machines.

mod path;
mod routing;
mod timer;

use crate::app::AppState;
use crate::connection::{Connection, ConnectionId};
use crate::group::{self, ExtensionSpec, GroupHandle, GroupState};
use crate::remote::Remote;
use crate::runloop::{self, Handle, TimerId};
use crate::telemetry::Telemetry;
use crate::{convert, Error, ErrorCode};
use indexmap::IndexMap;
use message::{Body, Message, MsgType, SharedMessage, StatusCode, LOCALHOST};
use models::{AppConfig, Graph, SchemaValidator};
use path::{MatchOutcome, PathEntry, PathKind, PathStore};
use routing::{FlowKind, ResolvedDest, RoutingTable};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use timer::EngineTimer;
use uuid::Uuid;

pub(crate) type EngineHandle = Handle<EngineState>;

/// Where the results of a routed command are delivered.
#[derive(Clone)]
pub(crate) enum ResultSink {
    /// A local extension's registered result handler.
    Extension {
        group: GroupHandle,
        extension: String,
    },
    /// A host-side subscriber (the app's submit API).
    External(tokio::sync::mpsc::UnboundedSender<SharedMessage>),
    /// Back across the inbound connection the command arrived through.
    Connection(ConnectionId),
    /// Back across a remote this engine dialed.
    Remote(String),
    /// The engine itself; results are logged and dropped.
    Engine,
}

struct StartProgress {
    origin: ResultSink,
    cmd: SharedMessage,
    pending_groups: HashSet<String>,
    failed: Option<Error>,
}

pub(crate) struct EngineState {
    pub graph_id: String,
    pub app_uri: String,
    config: Arc<AppConfig>,
    schema: Arc<dyn SchemaValidator>,
    pub handle: EngineHandle,
    app: Option<Handle<AppState>>,
    telemetry: Arc<Telemetry>,

    graph: Option<Graph>,
    routing: RoutingTable,
    groups: IndexMap<String, GroupHandle>,
    group_expected: HashMap<String, usize>,
    group_started: HashMap<String, usize>,

    paths: PathStore,
    // Recently finished cmd_ids, kept one sweep interval to tell duplicate
    // finals apart from unsolicited results.
    finished: HashSet<Uuid>,
    remotes: HashMap<String, Remote>,
    connections: HashMap<ConnectionId, Connection>,
    pub(crate) timers: HashMap<u64, EngineTimer>,

    start: Option<StartProgress>,
    closing: bool,
    close_reply: Option<(ResultSink, SharedMessage)>,
    pending_groups: HashSet<String>,
    pending_remotes: HashSet<String>,
    pending_connections: HashSet<ConnectionId>,
}

pub(crate) fn spawn(
    graph_id: String,
    app_uri: String,
    config: Arc<AppConfig>,
    schema: Arc<dyn SchemaValidator>,
    app: Option<Handle<AppState>>,
    telemetry: Arc<Telemetry>,
) -> EngineHandle {
    let name = format!("engine-{graph_id}");

    let handle = runloop::spawn(&name, move |handle| EngineState {
        graph_id,
        app_uri,
        config,
        schema,
        handle: handle.clone(),
        app,
        telemetry,
        graph: None,
        routing: RoutingTable::default(),
        groups: IndexMap::new(),
        group_expected: HashMap::new(),
        group_started: HashMap::new(),
        paths: PathStore::default(),
        finished: HashSet::new(),
        remotes: HashMap::new(),
        connections: HashMap::new(),
        timers: HashMap::new(),
        start: None,
        closing: false,
        close_reply: None,
        pending_groups: HashSet::new(),
        pending_remotes: HashSet::new(),
        pending_connections: HashSet::new(),
    });

    // The periodic path sweep reschedules itself for the engine's lifetime.
    handle.post(|engine: &mut EngineState| engine.schedule_sweep());
    handle
}

impl EngineState {
    fn path_check_interval(&self) -> Duration {
        Duration::from_micros(self.config.path_check_interval.max(1))
    }

    fn schedule_sweep(&mut self) {
        if self.closing {
            return;
        }
        self.handle
            .schedule_after(self.path_check_interval(), |engine: &mut EngineState| {
                engine.sweep_paths()
            });
    }

    fn sweep_paths(&mut self) {
        let now = Instant::now();
        for entry in self.paths.sweep(now) {
            self.expire_entry(entry);
        }
        self.finished.clear();
        self.schedule_sweep();
    }

    /// Route one message. This is the engine's single entrance: extensions,
    /// the app, inbound connections, and remotes all converge here.
    pub(crate) fn route(&mut self, msg: SharedMessage, origin: ResultSink) {
        self.telemetry.msgs_routed.inc();
        let msg_type = msg.get().msg_type();

        if msg_type == MsgType::CmdResult {
            return self.route_result(msg);
        }
        if self.closing {
            if msg_type.is_cmd_like() {
                self.reply_error(
                    &msg,
                    origin,
                    ErrorCode::RuntimeClosed,
                    "engine is closing".to_string(),
                );
            } else {
                self.telemetry.msgs_dropped.inc();
            }
            return;
        }

        match msg_type {
            MsgType::StartGraph => self.handle_start_graph(msg, origin),
            MsgType::StopGraph => self.handle_stop_graph(msg, origin),
            MsgType::CloseApp => self.handle_close_app(msg, origin),
            MsgType::Timer => self.handle_timer_cmd(msg, origin),
            _ => self.route_user(msg, origin),
        }
    }

    fn route_user(&mut self, msg: SharedMessage, origin: ResultSink) {
        let is_cmd = msg.get().msg_type().is_cmd_like();

        let edges: Vec<ResolvedDest> = if !msg.get().dests().is_empty() {
            // Explicit destinations route as given, without conversion.
            msg.get()
                .dests()
                .iter()
                .map(|loc| ResolvedDest {
                    loc: loc.clone(),
                    conversion: None,
                })
                .collect()
        } else {
            let kind = FlowKind::of(msg.get().msg_type()).expect("results were handled above");
            let src = &msg.get().src().extension;

            match self.routing.resolve(src, kind, msg.get().name()) {
                // A command takes the first declared edge; data and frames
                // fan out to every edge.
                Some(dests) if is_cmd => vec![dests[0].clone()],
                Some(dests) => dests.to_vec(),
                None => {
                    self.telemetry.msgs_dropped.inc();
                    if is_cmd {
                        self.reply_error(
                            &msg,
                            origin,
                            ErrorCode::MsgNotConnected,
                            format!("'{}' is not connected in the graph", msg.get().name()),
                        );
                    } else {
                        tracing::debug!(
                            name = msg.get().name(),
                            "dropping unconnected message",
                        );
                    }
                    return;
                }
            }
        };

        if is_cmd {
            self.insert_path(&msg, &edges, origin);
        }

        for edge in edges {
            let mut out = msg.get().forward_copy();
            out.clear_dests();
            out.add_dest(edge.loc.clone());

            if let Some(conversion) = &edge.conversion {
                if let Err(err) = convert::apply(conversion, &mut out) {
                    tracing::warn!(%err, name = out.name(), "message conversion failed");
                    if is_cmd {
                        self.synthesize_result(
                            &msg_parts(&msg),
                            ErrorCode::InvalidArgument,
                            format!("message conversion failed: {err}"),
                        );
                    }
                    continue;
                }
            }
            let out = SharedMessage::new(out);

            if edge.loc.is_local_to(&self.app_uri) {
                self.deliver_local(out);
            } else {
                self.send_remote(&edge.loc.app_uri, out, is_cmd);
            }
        }
    }

    fn insert_path(&mut self, msg: &SharedMessage, edges: &[ResolvedDest], origin: ResultSink) {
        let cmd_id = msg
            .get()
            .cmd_id()
            .expect("command-like messages carry a cmd_id");
        let deadline = Instant::now() + Duration::from_micros(self.config.path_timeout);

        let timer = self
            .handle
            .schedule_after(deadline - Instant::now(), move |engine: &mut EngineState| {
                engine.expire_path(cmd_id)
            });

        let kind = match &origin {
            ResultSink::Connection(_) | ResultSink::Remote(_) => PathKind::In,
            _ => PathKind::Out,
        };
        let remote_uri = edges
            .iter()
            .find(|edge| !edge.loc.is_local_to(&self.app_uri))
            .map(|edge| edge.loc.app_uri.clone());
        let result_conversion = match edges {
            [only] => only
                .conversion
                .as_ref()
                .and_then(|conversion| conversion.result.clone())
                .map(|result| *result),
            _ => None,
        };

        self.paths.insert(PathEntry {
            kind,
            cmd_id,
            original_cmd_type: msg.get().msg_type(),
            original_cmd_name: msg.get().name().to_string(),
            sink: origin,
            result_conversion,
            deadline,
            timer: Some(timer),
            last_result_seen: false,
            remote_uri,
        });
    }

    pub(crate) fn route_result(&mut self, result: SharedMessage) {
        let Some(cmd_id) = result.get().cmd_id() else {
            tracing::warn!("dropping a result with no cmd_id");
            return;
        };
        let is_final = result
            .get()
            .result()
            .map(|body| body.is_final)
            .unwrap_or(true);

        match self.paths.match_result(&cmd_id, is_final) {
            MatchOutcome::Unmatched => {
                self.telemetry.msgs_dropped.inc();
                if self.finished.contains(&cmd_id) {
                    self.telemetry.results_duplicate_final.inc();
                    tracing::warn!(%cmd_id, "dropping duplicate final result");
                } else {
                    tracing::warn!(%cmd_id, "dropping result with no pending path");
                }
            }
            MatchOutcome::Forward {
                sink,
                conversion,
                timer,
                consumed,
            } => {
                if let Some(timer) = timer {
                    self.handle.cancel_timer(timer);
                }
                if consumed {
                    self.finished.insert(cmd_id);
                }
                self.telemetry.results_matched.inc();

                let result = match conversion {
                    Some(conversion) => {
                        let mut copy = result.get().forward_copy();
                        if let Err(err) = convert::apply(&conversion, &mut copy) {
                            tracing::warn!(%err, "result conversion failed; forwarding unconverted");
                            result
                        } else {
                            SharedMessage::new(copy)
                        }
                    }
                    None => result,
                };
                self.deliver_result_to(sink, result);
            }
        }
    }

    pub(crate) fn deliver_result_to(&mut self, sink: ResultSink, result: SharedMessage) {
        match sink {
            ResultSink::Extension { group, extension } => {
                group.post(move |state: &mut GroupState| state.deliver_result(&extension, result));
            }
            ResultSink::External(tx) => {
                let _ = tx.send(result);
            }
            ResultSink::Connection(id) => match self.connections.get_mut(&id) {
                Some(connection) => match message::wire::encode(result.get()) {
                    Ok(bytes) => {
                        if let Err(err) = connection.protocol.send(bytes) {
                            tracing::warn!(%id, %err, "failed to send result over connection");
                        }
                    }
                    Err(err) => tracing::warn!(%id, %err, "unserializable result"),
                },
                None => tracing::warn!(%id, "result for a closed connection"),
            },
            ResultSink::Remote(uri) => match self.remotes.get_mut(&uri) {
                Some(remote) => {
                    if let Err(err) = remote.send(&result) {
                        tracing::warn!(%uri, %err, "failed to send result over remote");
                        self.remote_closed(&uri);
                    }
                }
                None => tracing::warn!(%uri, "result for a gone remote"),
            },
            ResultSink::Engine => {
                tracing::debug!(
                    status = ?result.get().result().map(|body| body.status_code),
                    name = ?result.get().result().map(|body| body.original_cmd_name.clone()),
                    "engine-internal result",
                );
            }
        }
    }

    /// Deliver a message whose single destination is a local extension.
    pub(crate) fn deliver_local(&mut self, msg: SharedMessage) {
        let Some(dest) = msg.get().dests().first().cloned() else {
            return;
        };

        let group_name = if !dest.extension_group.is_empty() {
            Some(dest.extension_group.clone())
        } else {
            self.routing.group_of(&dest.extension).map(str::to_string)
        };

        let group = group_name.as_deref().and_then(|name| self.groups.get(name));
        match group {
            Some(group) => {
                let extension = dest.extension.clone();
                group.post(move |state: &mut GroupState| state.deliver(&extension, msg));
            }
            None => {
                self.telemetry.msgs_dropped.inc();
                tracing::warn!(dest = %dest, "no local extension for destination");
                if msg.get().msg_type().is_cmd_like() {
                    self.synthesize_result(
                        &msg_parts(&msg),
                        ErrorCode::MsgNotConnected,
                        format!("no extension at {dest}"),
                    );
                }
            }
        }
    }

    fn send_remote(&mut self, uri: &str, msg: SharedMessage, is_cmd: bool) {
        if !self.remotes.contains_key(uri) {
            match Remote::connect(uri, self.handle.clone()) {
                Ok(remote) => {
                    tracing::debug!(uri, "constructed remote");
                    self.remotes.insert(uri.to_string(), remote);
                }
                Err(err) => {
                    tracing::warn!(uri, %err, "failed to construct remote");
                    if is_cmd {
                        self.synthesize_result(
                            &msg_parts(&msg),
                            ErrorCode::ProtocolError,
                            format!("cannot reach {uri}: {err}"),
                        );
                    }
                    return;
                }
            }
        }

        if let Err(err) = self.remotes.get_mut(uri).unwrap().send(&msg) {
            tracing::warn!(uri, %err, "remote send failed");
            self.remote_closed(uri);
        }
    }

    // Synthesize an error result for a command whose path (if any) is still
    // pending, and push it through the normal result flow so the path is
    // consumed and its timer cancelled.
    fn synthesize_result(&mut self, parts: &MsgParts, code: ErrorCode, detail: String) {
        let mut result = Message::cmd_result_from_parts(
            StatusCode::Error,
            parts.cmd_id,
            parts.msg_type,
            &parts.name,
        );
        if let Some(body) = result.result_mut() {
            body.error_code = Some(code);
            body.detail = value::Value::from(detail);
        }
        self.route_result(SharedMessage::new(result));
    }

    // A direct error reply for a command which never got a path.
    pub(crate) fn reply_error(
        &mut self,
        cmd: &SharedMessage,
        origin: ResultSink,
        code: ErrorCode,
        detail: String,
    ) {
        let Ok(mut result) = Message::cmd_result(StatusCode::Error, cmd.get()) else {
            return;
        };
        if let Some(body) = result.result_mut() {
            body.error_code = Some(code);
            body.detail = value::Value::from(detail);
        }
        self.deliver_result_to(origin, SharedMessage::new(result));
    }

    fn reply_ok_detail(&mut self, cmd: &SharedMessage, origin: ResultSink, detail: String) {
        let Ok(mut result) = Message::cmd_result(StatusCode::Ok, cmd.get()) else {
            return;
        };
        if let Some(body) = result.result_mut() {
            body.detail = value::Value::from(detail);
        }
        self.deliver_result_to(origin, SharedMessage::new(result));
    }

    // Path expiry.

    pub(crate) fn expire_path(&mut self, cmd_id: Uuid) {
        if let Some(entry) = self.paths.expire(&cmd_id) {
            self.expire_entry(entry);
        }
    }

    fn expire_entry(&mut self, entry: PathEntry) {
        self.telemetry.paths_expired.inc();
        self.finished.insert(entry.cmd_id);
        if let Some(timer) = entry.timer {
            self.handle.cancel_timer(timer);
        }
        tracing::warn!(
            cmd_id = %entry.cmd_id,
            kind = ?entry.kind,
            name = %entry.original_cmd_name,
            "command expired without a final result",
        );

        let mut result = Message::cmd_result_from_parts(
            StatusCode::Error,
            entry.cmd_id,
            entry.original_cmd_type,
            &entry.original_cmd_name,
        );
        if let Some(body) = result.result_mut() {
            body.error_code = Some(ErrorCode::Timeout);
            body.detail = value::Value::from(format!(
                "'{}' produced no final result before its deadline",
                entry.original_cmd_name
            ));
        }
        self.deliver_result_to(entry.sink, SharedMessage::new(result));
    }

    // Start-graph.

    fn handle_start_graph(&mut self, cmd: SharedMessage, origin: ResultSink) {
        if self.graph.is_some() {
            return self.reply_error(
                &cmd,
                origin,
                ErrorCode::InvalidGraph,
                format!("engine {} already runs a graph", self.graph_id),
            );
        }
        let Body::StartGraph(_, body) = cmd.get().body() else {
            return;
        };

        let graph = if !body.predefined_graph_name.is_empty() {
            match self.config.predefined_graph(&body.predefined_graph_name) {
                Some(predefined) => predefined.graph.clone(),
                None => {
                    return self.reply_error(
                        &cmd,
                        origin,
                        ErrorCode::InvalidGraph,
                        format!("no predefined graph '{}'", body.predefined_graph_name),
                    )
                }
            }
        } else {
            match Graph::from_str(&body.graph_json) {
                Ok(graph) => graph,
                Err(err) => {
                    return self.reply_error(&cmd, origin, ErrorCode::InvalidGraph, err.to_string())
                }
            }
        };

        if let Err(err) = self.validate_graph(&graph) {
            return self.reply_error(&cmd, origin, ErrorCode::InvalidGraph, err.message);
        }

        let routing = RoutingTable::build(&graph, &self.graph_id, &self.app_uri);

        // Collect per-group extension specs for nodes this app hosts.
        let mut specs: IndexMap<String, Vec<ExtensionSpec>> = IndexMap::new();
        for node in graph.extensions().filter(|node| self.node_is_local(node)) {
            let properties = match self.node_properties(node) {
                Ok(properties) => properties,
                Err(err) => {
                    return self.reply_error(&cmd, origin, ErrorCode::InvalidGraph, err.message)
                }
            };

            specs
                .entry(node.extension_group.clone())
                .or_insert_with(Vec::new)
                .push(ExtensionSpec {
                    name: node.name.clone(),
                    addon: node.addon.clone(),
                    properties,
                    connected_cmds: routing.connected_cmds(&node.name),
                });
        }

        self.routing = routing;
        self.graph = Some(graph);

        if specs.is_empty() {
            return self.reply_ok_detail(&cmd, origin, self.graph_id.clone());
        }

        let mut pending_groups = HashSet::new();
        for (group_name, group_specs) in specs {
            let handle = group::spawn(
                &group_name,
                &self.graph_id,
                &self.app_uri,
                self.handle.clone(),
            );
            self.group_expected
                .insert(group_name.clone(), group_specs.len());
            self.group_started.insert(group_name.clone(), 0);
            self.groups.insert(group_name.clone(), handle.clone());
            pending_groups.insert(group_name);

            handle.post(move |state: &mut GroupState| state.create_extensions(group_specs));
        }

        self.start = Some(StartProgress {
            origin,
            cmd,
            pending_groups,
            failed: None,
        });
    }

    fn validate_graph(&self, graph: &Graph) -> crate::Result<()> {
        graph.validate()?;

        let doc = serde_json::to_value(graph)
            .map_err(|err| Error::invalid_graph(err.to_string()))?;
        self.schema.validate(&doc)?;

        for node in graph.extensions().filter(|node| self.node_is_local(node)) {
            if !crate::addon::registry().has(models::AddonKind::Extension, &node.addon) {
                return Err(Error::invalid_graph(format!(
                    "extension addon '{}' is not registered",
                    node.addon
                )));
            }
        }
        Ok(())
    }

    fn node_is_local(&self, node: &models::Node) -> bool {
        node.app.is_empty() || node.app == LOCALHOST || node.app == self.app_uri
    }

    // The node's effective properties: the addon's defaults overlaid by the
    // node's graph-declared property object, key by key.
    fn node_properties(&self, node: &models::Node) -> crate::Result<value::Value> {
        let addon = crate::addon::registry().extension_addon(&node.addon)?;

        let mut doc = addon
            .default_property()
            .unwrap_or_else(|| serde_json::json!({}));
        if let Some(overlay) = &node.property {
            let (Some(doc), Some(overlay)) = (doc.as_object_mut(), overlay.as_object()) else {
                return Err(Error::invalid_graph(format!(
                    "node '{}' property is not an object",
                    node.name
                )));
            };
            for (name, field) in overlay {
                doc.insert(name.clone(), field.clone());
            }
        }
        Ok(value::from_json(&doc)?)
    }

    pub(crate) fn group_created(&mut self, name: &str) {
        tracing::debug!(group = name, graph_id = %self.graph_id, "group created");
    }

    pub(crate) fn extension_started(&mut self, group: &str, extension: &str) {
        tracing::debug!(group, extension, "extension started");

        if let Some(started) = self.group_started.get_mut(group) {
            *started += 1;
        }
        if self.group_started.get(group) != self.group_expected.get(group) {
            return;
        }
        tracing::debug!(group, "group started");

        if let Some(start) = &mut self.start {
            start.pending_groups.remove(group);
            if start.pending_groups.is_empty() && start.failed.is_none() {
                let start = self.start.take().unwrap();
                tracing::info!(graph_id = %self.graph_id, "graph started");
                self.reply_ok_detail(&start.cmd, start.origin, self.graph_id.clone());
            }
        }
    }

    /// A group could not create its extensions: fail the start and roll
    /// back whatever was already constructed.
    pub(crate) fn group_failed(&mut self, group: &str, err: Error) {
        tracing::error!(group, %err, "group failed; rolling back graph start");
        if let Some(start) = &mut self.start {
            if start.failed.is_none() {
                start.failed = Some(err);
            }
        }
        self.close(None);
    }

    // Stop-graph and close.

    fn handle_stop_graph(&mut self, cmd: SharedMessage, origin: ResultSink) {
        let Body::StopGraph(_, graph_id) = cmd.get().body() else {
            return;
        };
        if !graph_id.is_empty() && *graph_id != self.graph_id {
            return self.reply_error(
                &cmd,
                origin,
                ErrorCode::InvalidArgument,
                format!("engine runs graph {}, not {graph_id}", self.graph_id),
            );
        }
        self.close(Some((origin, cmd)));
    }

    fn handle_close_app(&mut self, cmd: SharedMessage, origin: ResultSink) {
        match self.app.clone() {
            Some(app) => {
                // Acknowledge as soon as the cascade is underway.
                self.reply_ok_detail(&cmd, origin, "closing".to_string());
                app.post(|state: &mut AppState| state.begin_close(0));
            }
            None => self.close(Some((origin, cmd))),
        }
    }

    /// Begin the engine's close cascade. `reply` is acknowledged once every
    /// group, remote, and connection has reported closed.
    pub(crate) fn close(&mut self, reply: Option<(ResultSink, SharedMessage)>) {
        if self.closing {
            if let Some((origin, cmd)) = reply {
                self.reply_error(
                    &cmd,
                    origin,
                    ErrorCode::RuntimeClosed,
                    "engine is already closing".to_string(),
                );
            }
            return;
        }
        tracing::info!(graph_id = %self.graph_id, "engine closing");
        self.closing = true;
        self.close_reply = reply;

        self.cancel_all_timers();

        // Outstanding commands resolve with AppClosed, exactly once each.
        for entry in self.paths.drain_all() {
            if let Some(timer) = entry.timer {
                self.handle.cancel_timer(timer);
            }
            let mut result = Message::cmd_result_from_parts(
                StatusCode::Error,
                entry.cmd_id,
                entry.original_cmd_type,
                &entry.original_cmd_name,
            );
            if let Some(body) = result.result_mut() {
                body.error_code = Some(ErrorCode::AppClosed);
                body.detail = value::Value::from("engine closed before a final result");
            }
            self.deliver_result_to(entry.sink, SharedMessage::new(result));
        }

        self.pending_remotes = self.remotes.keys().cloned().collect();
        for remote in self.remotes.values_mut() {
            remote.protocol.close();
        }
        self.pending_connections = self.connections.keys().copied().collect();
        for connection in self.connections.values_mut() {
            connection.protocol.close();
        }

        self.pending_groups = self.groups.keys().cloned().collect();
        for group in self.groups.values() {
            group.post(|state: &mut GroupState| state.begin_stop());
        }

        self.check_close_complete();
    }

    pub(crate) fn group_closed(&mut self, name: &str) {
        tracing::debug!(group = name, "group closed");
        self.pending_groups.remove(name);
        if let Some(group) = self.groups.shift_remove(name) {
            group.shutdown();
        }
        self.check_close_complete();
    }

    pub(crate) fn remote_closed(&mut self, uri: &str) {
        if let Some(mut remote) = self.remotes.remove(uri) {
            remote.protocol.close();
        }
        self.pending_remotes.remove(uri);

        // Every command outstanding through that remote fails now.
        for entry in self.paths.drain_remote(uri) {
            if let Some(timer) = entry.timer {
                self.handle.cancel_timer(timer);
            }
            self.finished.insert(entry.cmd_id);
            let mut result = Message::cmd_result_from_parts(
                StatusCode::Error,
                entry.cmd_id,
                entry.original_cmd_type,
                &entry.original_cmd_name,
            );
            if let Some(body) = result.result_mut() {
                body.error_code = Some(ErrorCode::ProtocolError);
                body.detail = value::Value::from(format!("remote {uri} closed"));
            }
            self.deliver_result_to(entry.sink, SharedMessage::new(result));
        }
        self.check_close_complete();
    }

    // Inbound connections.

    pub(crate) fn adopt_connection(&mut self, connection: Connection) {
        tracing::debug!(id = %connection.id, graph_id = %self.graph_id, "connection migrated");
        self.connections.insert(connection.id, connection);
    }

    pub(crate) fn on_inbound(&mut self, id: ConnectionId, msg: SharedMessage) {
        if msg.get().msg_type() == MsgType::CmdResult {
            self.route_result(msg);
        } else {
            self.route(msg, ResultSink::Connection(id));
        }
    }

    pub(crate) fn on_remote_inbound(&mut self, uri: &str, msg: SharedMessage) {
        if msg.get().msg_type() == MsgType::CmdResult {
            self.route_result(msg);
        } else {
            self.route(msg, ResultSink::Remote(uri.to_string()));
        }
    }

    pub(crate) fn connection_closed(&mut self, id: ConnectionId) {
        self.connections.remove(&id);
        self.pending_connections.remove(&id);
        self.check_close_complete();
    }

    fn check_close_complete(&mut self) {
        if !self.closing
            || !self.pending_groups.is_empty()
            || !self.pending_remotes.is_empty()
            || !self.pending_connections.is_empty()
        {
            return;
        }
        tracing::info!(graph_id = %self.graph_id, "engine closed");

        // A failed start is acknowledged with its recorded error; a
        // stop-graph with ok.
        if let Some(start) = self.start.take() {
            let err = start
                .failed
                .unwrap_or_else(|| Error::invalid_graph("graph start failed"));
            self.reply_error(&start.cmd, start.origin, err.code, err.message);
        }
        if let Some((origin, cmd)) = self.close_reply.take() {
            self.reply_ok_detail(&cmd, origin, self.graph_id.clone());
        }

        if let Some(app) = self.app.clone() {
            let graph_id = self.graph_id.clone();
            app.post(move |state: &mut AppState| state.engine_closed(&graph_id));
        }
        self.handle.shutdown();
    }
}

// The correlation fields needed to synthesize a result for a command.
struct MsgParts {
    cmd_id: Uuid,
    msg_type: MsgType,
    name: String,
}

fn msg_parts(msg: &SharedMessage) -> MsgParts {
    MsgParts {
        cmd_id: msg.get().cmd_id().unwrap_or_else(Uuid::nil),
        msg_type: msg.get().msg_type(),
        name: msg.get().name().to_string(),
    }
}
