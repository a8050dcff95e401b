//! Engine timers, driven by the built-in timer command. Starting a timer
//! delivers a timeout command to the requester on each firing; a timer
//! command for an existing timer_id with `times == 0` cancels it.

use super::{EngineState, ResultSink};
use crate::runloop::TimerId;
use message::{Body, Location, Message, SharedMessage, StatusCode};
use std::time::Duration;

pub(crate) struct EngineTimer {
    pub requester: Location,
    pub period: Duration,
    /// Total firings requested; -1 repeats until cancelled.
    pub times: i64,
    pub fired: i64,
    pub armed: TimerId,
}

impl EngineState {
    pub(crate) fn handle_timer_cmd(&mut self, cmd: SharedMessage, origin: ResultSink) {
        let Body::Timer(_, body) = cmd.get().body() else {
            return;
        };
        let (timer_id, times) = (body.timer_id, body.times);

        if times == 0 {
            // Cancellation of a running timer.
            match self.timers.remove(&timer_id) {
                Some(timer) => {
                    self.handle.cancel_timer(timer.armed);
                    self.reply_ok(&cmd, origin, "timer stopped");
                }
                None => self.reply_error(
                    &cmd,
                    origin,
                    message::ErrorCode::InvalidArgument,
                    format!("no running timer {timer_id}"),
                ),
            }
            return;
        }

        if self.timers.contains_key(&timer_id) {
            self.reply_error(
                &cmd,
                origin,
                message::ErrorCode::InvalidArgument,
                format!("timer {timer_id} is already running"),
            );
            return;
        }

        let period = Duration::from_micros(body.timeout_us);
        let armed = self
            .handle
            .schedule_after(period, move |engine: &mut EngineState| {
                engine.fire_timer(timer_id)
            });

        self.timers.insert(
            timer_id,
            EngineTimer {
                requester: cmd.get().src().clone(),
                period,
                times,
                fired: 0,
                armed,
            },
        );
        self.reply_ok(&cmd, origin, "timer started");
    }

    pub(crate) fn fire_timer(&mut self, timer_id: u64) {
        let Some(timer) = self.timers.get_mut(&timer_id) else {
            return; // Cancelled between scheduling and firing.
        };
        timer.fired += 1;

        let mut timeout = Message::timeout(timer_id);
        timeout.set_src(Location::new(
            self.app_uri.clone(),
            self.graph_id.clone(),
            "",
            "",
        ));
        timeout.add_dest(timer.requester.clone());

        let exhausted = timer.times >= 0 && timer.fired >= timer.times;
        if exhausted {
            self.timers.remove(&timer_id);
        } else {
            let period = self.timers[&timer_id].period;
            let armed = self
                .handle
                .schedule_after(period, move |engine: &mut EngineState| {
                    engine.fire_timer(timer_id)
                });
            self.timers.get_mut(&timer_id).unwrap().armed = armed;
        }

        // Timeout firings are one-way: no path is opened for them, and any
        // result an extension returns is dropped as unsolicited.
        self.deliver_local(SharedMessage::new(timeout));
    }

    pub(crate) fn cancel_all_timers(&mut self) {
        for (_, timer) in self.timers.drain() {
            self.handle.cancel_timer(timer.armed);
        }
    }

    fn reply_ok(&mut self, cmd: &SharedMessage, origin: ResultSink, detail: &str) {
        if let Ok(mut result) = Message::cmd_result(StatusCode::Ok, cmd.get()) {
            if let Some(body) = result.result_mut() {
                body.detail = value::Value::from(detail);
            }
            self.deliver_result_to(origin, SharedMessage::new(result));
        }
    }
}
