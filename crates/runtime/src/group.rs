//! An extension group owns one runloop thread and the extensions which run
//! on it. The group drives each extension's lifecycle state machine from
//! acknowledgement to acknowledgement, buffers messages which arrive before
//! an extension is Started, and reports aggregate progress (created,
//! started, closed) up to its engine.

use crate::addon::ExtensionAddon;
use crate::engine::{EngineHandle, EngineState, ResultSink};
use crate::extension::{LifecycleAck, LifecycleState};
use crate::runloop::{self, Handle};
use crate::{Env, Extension};
use message::{ErrorCode, Message, MsgType, SharedMessage, StatusCode};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

pub(crate) type GroupHandle = Handle<GroupState>;

/// Everything needed to instantiate one extension in a group.
pub(crate) struct ExtensionSpec {
    pub name: String,
    pub addon: String,
    pub properties: value::Value,
    pub connected_cmds: HashSet<String>,
}

pub(crate) struct GroupState {
    name: String,
    graph_id: String,
    app_uri: String,
    engine: EngineHandle,
    handle: GroupHandle,
    extensions: indexmap::IndexMap<String, ExtensionSlot>,
    closing: bool,
}

struct ExtensionSlot {
    extension: Box<dyn Extension>,
    // Retained to retire the instance through its factory.
    addon: Arc<dyn ExtensionAddon>,
    env: Env,
    state: LifecycleState,
    pending: VecDeque<SharedMessage>,
}

/// Spawn the group's runloop thread.
pub(crate) fn spawn(
    name: &str,
    graph_id: &str,
    app_uri: &str,
    engine: EngineHandle,
) -> GroupHandle {
    let (name, graph_id, app_uri) = (
        name.to_string(),
        graph_id.to_string(),
        app_uri.to_string(),
    );

    runloop::spawn(&format!("group-{name}"), move |handle| GroupState {
        name,
        graph_id,
        app_uri,
        engine,
        handle: handle.clone(),
        extensions: indexmap::IndexMap::new(),
        closing: false,
    })
}

impl GroupState {
    pub(crate) fn env_mut(&mut self, extension: &str) -> Option<&mut Env> {
        self.extensions
            .get_mut(extension)
            .map(|slot| &mut slot.env)
    }

    /// Instantiate `specs` through the addon registry and begin configuring
    /// each. Creation failures abort the whole group; the engine rolls the
    /// graph back.
    pub(crate) fn create_extensions(&mut self, specs: Vec<ExtensionSpec>) {
        for spec in specs {
            let addon = match crate::addon::registry().extension_addon(&spec.addon) {
                Ok(addon) => addon,
                Err(err) => {
                    tracing::error!(
                        group = %self.name,
                        addon = %spec.addon,
                        %err,
                        "failed to create extension instance",
                    );
                    let group = self.name.clone();
                    self.engine
                        .post(move |engine: &mut EngineState| engine.group_failed(&group, err));
                    return;
                }
            };
            let extension = addon.create(&spec.name);

            let loc = message::Location::new(
                self.app_uri.clone(),
                self.graph_id.clone(),
                self.name.clone(),
                spec.name.clone(),
            );
            let env = Env::new(
                loc,
                self.engine.clone(),
                self.handle.clone(),
                spec.properties,
                spec.connected_cmds,
            );

            self.extensions.insert(
                spec.name.clone(),
                ExtensionSlot {
                    extension,
                    addon,
                    env,
                    state: LifecycleState::Init,
                    pending: VecDeque::new(),
                },
            );
        }

        let group = self.name.clone();
        self.engine
            .post(move |engine: &mut EngineState| engine.group_created(&group));

        // Kick every extension's configure phase. Each advances on its own
        // acknowledgements from here.
        for ind in 0..self.extensions.len() {
            let (_, slot) = self.extensions.get_index_mut(ind).unwrap();
            slot.extension.on_configure(&mut slot.env);
        }
    }

    /// One extension acknowledged a lifecycle phase.
    pub(crate) fn advance(&mut self, extension: &str, ack: LifecycleAck) {
        let Some(slot) = self.extensions.get_mut(extension) else {
            tracing::warn!(extension, ?ack, "lifecycle ack for a gone extension");
            return;
        };

        match (slot.state, ack) {
            (LifecycleState::Init, LifecycleAck::ConfigureDone) => {
                slot.state = LifecycleState::Configured;
                slot.extension.on_init(&mut slot.env);
            }
            (LifecycleState::Configured, LifecycleAck::InitDone) => {
                slot.state = LifecycleState::Initialized;
                slot.extension.on_start(&mut slot.env);
            }
            (LifecycleState::Initialized, LifecycleAck::StartDone) => {
                slot.state = LifecycleState::Started;

                while let Some(msg) = slot.pending.pop_front() {
                    Self::dispatch(slot, msg);
                }

                let (group, name) = (self.name.clone(), extension.to_string());
                self.engine.post(move |engine: &mut EngineState| {
                    engine.extension_started(&group, &name)
                });
            }
            (LifecycleState::Stopping, LifecycleAck::StopDone) => {
                slot.state = LifecycleState::Deinit;
                slot.extension.on_deinit(&mut slot.env);
            }
            (LifecycleState::Deinit, LifecycleAck::DeinitDone) => {
                slot.state = LifecycleState::Dead;

                // Retire the instance here, on its owning thread.
                if let Some(slot) = self.extensions.shift_remove(extension) {
                    slot.addon.destroy(slot.extension);
                }

                if self.closing && self.extensions.is_empty() {
                    let group = self.name.clone();
                    self.engine
                        .post(move |engine: &mut EngineState| engine.group_closed(&group));
                }
            }
            (state, ack) => {
                tracing::warn!(extension, ?state, ?ack, "out-of-order lifecycle ack");
            }
        }
    }

    /// Deliver one message to one extension of this group. Messages queue
    /// until the extension is Started and are refused once it is stopping.
    pub(crate) fn deliver(&mut self, extension: &str, msg: SharedMessage) {
        let closing = self.closing;
        let Some(slot) = self.extensions.get_mut(extension) else {
            self.refuse(extension, msg);
            return;
        };

        if slot.state == LifecycleState::Started && !closing {
            Self::dispatch(slot, msg);
        } else if slot.state < LifecycleState::Started && !closing {
            slot.pending.push_back(msg);
        } else {
            self.refuse(extension, msg);
        }
    }

    fn dispatch(slot: &mut ExtensionSlot, msg: SharedMessage) {
        match msg.get().msg_type() {
            MsgType::Data => slot.extension.on_data(&mut slot.env, msg),
            MsgType::AudioFrame => slot.extension.on_audio_frame(&mut slot.env, msg),
            MsgType::VideoFrame => slot.extension.on_video_frame(&mut slot.env, msg),
            // Commands, including built-ins such as timer firings.
            _ => slot.extension.on_cmd(&mut slot.env, msg),
        }
    }

    // A message for an extension that is stopping or gone. Commands get an
    // ExtensionNotReady error result; everything else is dropped.
    fn refuse(&mut self, extension: &str, msg: SharedMessage) {
        tracing::debug!(
            group = %self.name,
            extension,
            msg_type = %msg.get().msg_type(),
            "dropping message for an extension that is not accepting",
        );

        if msg.get().msg_type().is_cmd_like() {
            if let Ok(mut result) =
                Message::cmd_result(StatusCode::Error, msg.get())
            {
                if let Some(body) = result.result_mut() {
                    body.error_code = Some(ErrorCode::ExtensionNotReady);
                    body.detail = value::Value::from(format!(
                        "extension '{extension}' is not accepting messages"
                    ));
                }
                self.engine.post(move |engine: &mut EngineState| {
                    engine.route(SharedMessage::new(result), ResultSink::Engine)
                });
            }
        }
    }

    /// One result for a command an extension of this group sent earlier.
    pub(crate) fn deliver_result(&mut self, extension: &str, result: SharedMessage) {
        let Some(slot) = self.extensions.get_mut(extension) else {
            tracing::debug!(extension, "dropping result for a gone extension");
            return;
        };

        let Some(cmd_id) = result.get().cmd_id() else {
            return;
        };
        let is_final = result
            .get()
            .result()
            .map(|body| body.is_final)
            .unwrap_or(true);

        match slot.env.take_result_handler(cmd_id) {
            Some(mut handler) => {
                handler(&mut slot.env, result);
                if !is_final {
                    slot.env.put_result_handler(cmd_id, handler);
                }
            }
            None => {
                tracing::debug!(extension, %cmd_id, "result without a registered handler");
            }
        }
    }

    /// Begin the close flow: Started extensions get their stop callback;
    /// extensions which never started skip straight to deinit, and never
    /// observe the close as an error.
    pub(crate) fn begin_stop(&mut self) {
        self.closing = true;

        if self.extensions.is_empty() {
            let group = self.name.clone();
            self.engine
                .post(move |engine: &mut EngineState| engine.group_closed(&group));
            return;
        }

        for ind in 0..self.extensions.len() {
            let (_, slot) = self.extensions.get_index_mut(ind).unwrap();
            match slot.state {
                LifecycleState::Started => {
                    slot.state = LifecycleState::Stopping;
                    slot.extension.on_stop(&mut slot.env);
                }
                state if state < LifecycleState::Started => {
                    slot.pending.clear();
                    slot.state = LifecycleState::Deinit;
                    slot.extension.on_deinit(&mut slot.env);
                }
                _ => {} // Already stopping or later.
            }
        }
    }
}
