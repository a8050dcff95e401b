use crate::Env;
use message::SharedMessage;

/// Extension is the trait user components implement. Every callback runs on
/// the owning group's thread, one at a time, and must return promptly:
/// long work belongs on another thread, reporting back through an
/// [`crate::EnvProxy`].
///
/// Lifecycle callbacks acknowledge completion through the matching
/// `Env::on_*_done` call. The default implementations acknowledge
/// immediately, which is right for extensions with nothing to set up; an
/// extension doing asynchronous setup calls `on_*_done` later, from
/// whichever thread finished the work, via a proxy.
pub trait Extension: Send + 'static {
    fn on_configure(&mut self, env: &mut Env) {
        env.on_configure_done();
    }

    fn on_init(&mut self, env: &mut Env) {
        env.on_init_done();
    }

    fn on_start(&mut self, env: &mut Env) {
        env.on_start_done();
    }

    fn on_stop(&mut self, env: &mut Env) {
        env.on_stop_done();
    }

    fn on_deinit(&mut self, env: &mut Env) {
        env.on_deinit_done();
    }

    /// A command addressed to this extension. Respond with
    /// [`Env::return_result`], now or later.
    fn on_cmd(&mut self, env: &mut Env, cmd: SharedMessage) {
        let _ = (env, cmd);
    }

    fn on_data(&mut self, env: &mut Env, data: SharedMessage) {
        let _ = (env, data);
    }

    fn on_audio_frame(&mut self, env: &mut Env, frame: SharedMessage) {
        let _ = (env, frame);
    }

    fn on_video_frame(&mut self, env: &mut Env, frame: SharedMessage) {
        let _ = (env, frame);
    }
}

/// The lifecycle of one extension instance. Transitions are edge-triggered
/// by the extension acknowledging the previous phase; user messages are
/// delivered only in Started, buffered before it, and refused from Stopping
/// onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Init,
    Configured,
    Initialized,
    Started,
    Stopping,
    Deinit,
    Dead,
}

/// Which `on_*_done` acknowledgement an extension issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleAck {
    ConfigureDone,
    InitDone,
    StartDone,
    StopDone,
    DeinitDone,
}
