use crate::engine::{EngineHandle, ResultSink};
use crate::extension::LifecycleAck;
use crate::group::{GroupHandle, GroupState};
use crate::{Error, ErrorCode, Result};
use message::{Location, Message, MsgType, SharedMessage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;
use value::{Path, Value};

/// Invoked on the sending extension's thread for each result of a command
/// it sent. Called once per non-final result and once for the final one.
pub type ResultHandler = Box<dyn FnMut(&mut Env, SharedMessage) + Send>;

/// Env is the thread-affine capability handle an extension works through:
/// sending messages, returning results, reading and writing its own
/// property tree, and acknowledging lifecycle phases.
///
/// An Env belongs to its extension's thread. Every call checks the calling
/// thread: a violation is a bug in the caller, reported loudly in release
/// builds and fatally in debug builds. The only way to reach an Env from
/// another thread is an [`EnvProxy`].
pub struct Env {
    loc: Location,
    engine: EngineHandle,
    group: GroupHandle,
    properties: Value,
    result_handlers: HashMap<Uuid, ResultHandler>,
    connected_cmds: HashSet<String>,
    proxy_refs: usize,
}

impl Env {
    pub(crate) fn new(
        loc: Location,
        engine: EngineHandle,
        group: GroupHandle,
        properties: Value,
        connected_cmds: HashSet<String>,
    ) -> Self {
        Self {
            loc,
            engine,
            group,
            properties,
            result_handlers: HashMap::new(),
            connected_cmds,
            proxy_refs: 0,
        }
    }

    fn check_thread(&self) {
        if !self.group.on_own_thread() {
            debug_assert!(false, "Env for '{}' used off its owning thread", self.loc);
            tracing::error!(loc = %self.loc, "Env used off its owning thread");
        }
    }

    /// This extension's own location.
    pub fn loc(&self) -> &Location {
        &self.loc
    }

    fn origin(&self) -> ResultSink {
        ResultSink::Extension {
            group: self.group.clone(),
            extension: self.loc.extension.clone(),
        }
    }

    fn submit(&self, mut msg: Message) -> Result<()> {
        msg.set_src(self.loc.clone());
        let origin = self.origin();
        let msg = SharedMessage::new(msg);

        self.engine.post(move |engine| engine.route(msg, origin));
        Ok(())
    }

    /// Send a message into the graph. Destinations are taken from the
    /// message if set, and resolved through graph connections otherwise.
    /// Results of a command sent this way are discarded.
    pub fn send(&mut self, msg: Message) -> Result<()> {
        self.check_thread();
        if msg.msg_type() == MsgType::CmdResult {
            return Err(Error::invalid_argument(
                "results are returned with return_result, not send",
            ));
        }
        self.submit(msg)
    }

    /// Send a command and register `handler` for its results. The handler
    /// runs on this extension's thread; it sees every streaming result and
    /// exactly one final result, which may be a synthesized error.
    pub fn send_cmd(
        &mut self,
        cmd: Message,
        handler: impl FnMut(&mut Env, SharedMessage) + Send + 'static,
    ) -> Result<()> {
        self.check_thread();
        if !cmd.msg_type().is_cmd_like() {
            return Err(Error::invalid_argument(format!(
                "send_cmd takes a command, not {}",
                cmd.msg_type()
            )));
        }
        let cmd_id = cmd.cmd_id().expect("command-like messages carry a cmd_id");
        self.result_handlers.insert(cmd_id, Box::new(handler));
        self.submit(cmd)
    }

    /// Return a result for a command this extension received. Build it with
    /// [`Message::cmd_result`] against the original command.
    pub fn return_result(&mut self, result: Message) -> Result<()> {
        self.check_thread();
        if result.msg_type() != MsgType::CmdResult {
            return Err(Error::invalid_argument("return_result takes a CmdResult"));
        }
        self.submit(result)
    }

    /// Whether a command of `name` sent from here has somewhere to go.
    pub fn is_cmd_connected(&self, name: &str) -> bool {
        self.check_thread();
        self.connected_cmds.contains(name)
    }

    /// Read a property of this extension, by dotted path.
    pub fn get_property(&self, path: &str) -> Result<Value> {
        self.check_thread();
        let path: Path = path.parse().map_err(value::Error::from)?;
        Ok(self.properties.get(&path)?.clone())
    }

    pub fn set_property(&mut self, path: &str, value: Value) -> Result<()> {
        self.check_thread();
        let path: Path = path.parse().map_err(value::Error::from)?;
        self.properties.set(&path, value)?;
        Ok(())
    }

    /// The whole property tree.
    pub fn properties(&self) -> &Value {
        &self.properties
    }

    /// Manufacture an extension instance through the process-wide addon
    /// registry.
    pub fn addon_create_extension(
        &self,
        addon_name: &str,
        instance_name: &str,
    ) -> Result<Box<dyn crate::Extension>> {
        self.check_thread();
        let addon = crate::addon::registry().extension_addon(addon_name)?;
        Ok(addon.create(instance_name))
    }

    /// A cross-thread companion for this Env.
    pub fn proxy(&mut self) -> EnvProxy {
        self.check_thread();
        self.proxy_refs += 1;
        EnvProxy {
            token: Arc::new(ProxyToken {
                group: self.group.clone(),
                extension: self.loc.extension.clone(),
            }),
        }
    }

    pub(crate) fn on_proxy_released(&mut self) {
        self.proxy_refs = self.proxy_refs.saturating_sub(1);
        if self.proxy_refs == 0 {
            tracing::debug!(loc = %self.loc, "last EnvProxy released");
        }
    }

    pub(crate) fn take_result_handler(&mut self, cmd_id: Uuid) -> Option<ResultHandler> {
        self.result_handlers.remove(&cmd_id)
    }

    pub(crate) fn put_result_handler(&mut self, cmd_id: Uuid, handler: ResultHandler) {
        self.result_handlers.insert(cmd_id, handler);
    }

    // Lifecycle acknowledgements. Each posts the transition back onto the
    // group's queue rather than mutating in place, so an ack issued from
    // within a lifecycle callback takes effect after that callback returns.

    pub fn on_configure_done(&mut self) {
        self.ack(LifecycleAck::ConfigureDone);
    }

    pub fn on_init_done(&mut self) {
        self.ack(LifecycleAck::InitDone);
    }

    pub fn on_start_done(&mut self) {
        self.ack(LifecycleAck::StartDone);
    }

    pub fn on_stop_done(&mut self) {
        self.ack(LifecycleAck::StopDone);
    }

    pub fn on_deinit_done(&mut self) {
        self.ack(LifecycleAck::DeinitDone);
    }

    fn ack(&self, ack: LifecycleAck) {
        self.check_thread();
        let extension = self.loc.extension.clone();
        self.group
            .post(move |group: &mut GroupState| group.advance(&extension, ack));
    }
}

struct ProxyToken {
    group: GroupHandle,
    extension: String,
}

impl Drop for ProxyToken {
    fn drop(&mut self) {
        let extension = self.extension.clone();
        self.group.post_proxy(move |group: &mut GroupState| {
            if let Some(env) = group.env_mut(&extension) {
                env.on_proxy_released();
            }
        });
    }
}

/// EnvProxy is the one object that crosses threads on an extension's
/// behalf. It posts closures which run on the extension's thread with
/// exclusive access to its [`Env`].
///
/// Notifies issued from one thread run in issue order. A notify posted
/// after the extension is gone is silently dropped, so closures must be
/// side-effect-safe to drop.
#[derive(Clone)]
pub struct EnvProxy {
    token: Arc<ProxyToken>,
}

impl EnvProxy {
    /// Post `f` to run on the extension's thread. Never blocks.
    pub fn notify(&self, f: impl FnOnce(&mut Env) + Send + 'static) {
        let extension = self.token.extension.clone();
        self.token.group.post_proxy(move |group: &mut GroupState| {
            match group.env_mut(&extension) {
                Some(env) => f(env),
                None => tracing::debug!(%extension, "dropping notify for a gone extension"),
            }
        });
    }

    /// Post `f` and block until it has run. Refused on the extension's own
    /// thread (it would deadlock) and inside any runloop thread (which must
    /// never block).
    pub fn notify_sync(&self, f: impl FnOnce(&mut Env) + Send + 'static) -> Result<()> {
        if self.token.group.on_own_thread() {
            return Err(Error::invalid_argument(
                "notify_sync would deadlock on the Env's own thread",
            ));
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::invalid_argument(
                "notify_sync may not block a runloop thread",
            ));
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.notify(move |env| {
            f(env);
            let _ = tx.send(());
        });
        rx.blocking_recv().map_err(|_| {
            Error::new(
                ErrorCode::RuntimeClosed,
                "extension was destroyed before the notify ran",
            )
        })
    }

    /// Pin the extension's thread to proxy traffic only. Mailbox delivery
    /// pauses until [`EnvProxy::release_lock_mode`]. For harness and mock
    /// use; must be called from a plain thread.
    pub fn acquire_lock_mode(&self) {
        self.token.group.acquire_lock_mode();
    }

    pub fn release_lock_mode(&self) {
        self.token.group.release_lock_mode();
    }
}
