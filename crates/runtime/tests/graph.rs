//! End-to-end graph scenarios against a running App: command echo across
//! extensions, graph validation failures, path expiry, and cross-thread
//! proxy ordering.

use message::{Body, ErrorCode, Location, Message, MsgType, SharedMessage, StatusCode};
use models::AppConfig;
use runtime::{register_addon_as_extension, App, AppOptions, Env, EnvProxy, Extension};
use serde_json::json;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

/// Replies `"<cmd name>, too"` to every command it receives.
struct Echo;

impl Extension for Echo {
    fn on_cmd(&mut self, env: &mut Env, cmd: SharedMessage) {
        let mut result = Message::cmd_result(StatusCode::Ok, cmd.get()).unwrap();
        result.result_mut().unwrap().detail =
            value::Value::from(format!("{}, too", cmd.get().name()));
        env.return_result(result).unwrap();
    }
}

/// On a `kick` command, sends `hello` through the graph and forwards the
/// observed result detail back to whoever kicked it.
struct Client;

impl Extension for Client {
    fn on_cmd(&mut self, env: &mut Env, cmd: SharedMessage) {
        assert!(env.is_cmd_connected("hello"));

        let hello = Message::cmd("hello").unwrap();
        env.send_cmd(hello, move |env: &mut Env, result: SharedMessage| {
            let body = result.get().result().unwrap();

            let mut reply = Message::cmd_result(body.status_code, cmd.get()).unwrap();
            {
                let out = reply.result_mut().unwrap();
                out.error_code = body.error_code;
                out.detail = body.detail.clone();
            }
            env.return_result(reply).unwrap();
        })
        .unwrap();
    }
}

fn options(config: AppConfig) -> AppOptions {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    AppOptions {
        config,
        // Tests in this process share the registry; leave it alone.
        unregister_addons_on_close: false,
        ..Default::default()
    }
}

fn two_node_graph(client_addon: &str, server_addon: &str) -> serde_json::Value {
    json!({
        "nodes": [
            {"type": "extension", "name": "client", "addon": client_addon,
             "extension_group": "front"},
            {"type": "extension", "name": "server", "addon": server_addon,
             "extension_group": "back"},
        ],
        "connections": [
            {"extension": "client",
             "cmd": [{"name": "hello", "dest": [{"extension": "server"}]}]},
        ],
    })
}

fn start_graph(app: &App, graph: serde_json::Value) -> String {
    let cmd = Message::start_graph(message::StartGraphBody {
        graph_json: graph.to_string(),
        ..Default::default()
    });
    let mut results = app.submit(cmd);
    let result = results.blocking_recv().expect("start_graph yields a result");
    let body = result.get().result().unwrap();
    assert_eq!(body.status_code, StatusCode::Ok, "detail: {:?}", body.detail);
    body.detail.as_str().unwrap().to_string()
}

#[test]
fn test_echo_cmd_round_trip() {
    register_addon_as_extension("echo_rt_client", |_: &str| {
        Box::new(Client) as Box<dyn Extension>
    });
    register_addon_as_extension("echo_rt_server", |_: &str| {
        Box::new(Echo) as Box<dyn Extension>
    });

    let app = App::start(options(AppConfig::default())).unwrap();
    let graph_id = start_graph(&app, two_node_graph("echo_rt_client", "echo_rt_server"));

    let mut kick = Message::cmd("kick").unwrap();
    kick.add_dest(Location::new("", graph_id.clone(), "front", "client"));
    let sent_cmd_id = kick.cmd_id().unwrap();

    let mut results = app.submit(kick);
    let result = results.blocking_recv().expect("kick yields a result");
    let body = result.get().result().unwrap();

    assert_eq!(result.get().cmd_id(), Some(sent_cmd_id));
    assert_eq!(body.status_code, StatusCode::Ok);
    assert!(body.is_final);
    assert_eq!(body.detail.as_str().unwrap(), "hello, too");

    // Exactly one result: the channel closes after the final.
    assert!(results.blocking_recv().is_none());

    app.close();
    assert_eq!(app.wait(), 0);
}

#[test]
fn test_start_graph_with_unknown_addon_is_rejected() {
    register_addon_as_extension("known_addon", |_: &str| Box::new(Echo) as Box<dyn Extension>);

    let app = App::start(options(AppConfig::default())).unwrap();

    let cmd = Message::start_graph(message::StartGraphBody {
        graph_json: two_node_graph("known_addon", "unregistered_addon").to_string(),
        ..Default::default()
    });
    let mut results = app.submit(cmd);
    let result = results.blocking_recv().unwrap();
    let body = result.get().result().unwrap();

    assert_eq!(body.status_code, StatusCode::Error);
    assert_eq!(body.error_code, Some(ErrorCode::InvalidGraph));

    // The app is still healthy: a valid graph starts afterwards.
    register_addon_as_extension("known_addon_2", |_: &str| {
        Box::new(Echo) as Box<dyn Extension>
    });
    start_graph(&app, two_node_graph("known_addon", "known_addon_2"));

    app.close();
    assert_eq!(app.wait(), 0);
}

#[test]
fn test_structurally_invalid_graph_is_rejected() {
    let app = App::start(options(AppConfig::default())).unwrap();

    for graph_json in [
        "{ not json".to_string(),
        // Connection from an undeclared extension.
        json!({
            "nodes": [],
            "connections": [{"extension": "ghost",
                             "cmd": [{"name": "x", "dest": [{"extension": "ghost"}]}]}],
        })
        .to_string(),
    ] {
        let cmd = Message::start_graph(message::StartGraphBody {
            graph_json,
            ..Default::default()
        });
        let mut results = app.submit(cmd);
        let body_msg = results.blocking_recv().unwrap();
        let body = body_msg.get().result().unwrap();
        assert_eq!(body.status_code, StatusCode::Error);
        assert_eq!(body.error_code, Some(ErrorCode::InvalidGraph));
    }

    app.close();
    assert_eq!(app.wait(), 0);
}

/// Never replies; optionally replies long after its deadline through a
/// proxy, to prove late results are dropped.
struct Slow {
    late_reply_after: Option<Duration>,
}

impl Extension for Slow {
    fn on_cmd(&mut self, env: &mut Env, cmd: SharedMessage) {
        let Some(delay) = self.late_reply_after else {
            return; // Never answer.
        };
        let proxy = env.proxy();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            proxy.notify(move |env: &mut Env| {
                let result = Message::cmd_result(StatusCode::Ok, cmd.get()).unwrap();
                let _ = env.return_result(result);
            });
        });
    }
}

#[test]
fn test_path_expiry_fires_exactly_once() {
    register_addon_as_extension("timeout_client", |_: &str| {
        Box::new(Client) as Box<dyn Extension>
    });
    register_addon_as_extension("timeout_slow", |_: &str| {
        Box::new(Slow {
            late_reply_after: Some(Duration::from_millis(600)),
        }) as Box<dyn Extension>
    });

    let config: AppConfig = serde_json::from_value(json!({
        "path_timeout": 200_000,        // 200ms.
        "path_check_interval": 50_000,  // 50ms.
    }))
    .unwrap();

    let app = App::start(options(config)).unwrap();
    let graph_id = start_graph(&app, two_node_graph("timeout_client", "timeout_slow"));

    let mut kick = Message::cmd("kick").unwrap();
    kick.add_dest(Location::new("", graph_id, "front", "client"));
    let mut results = app.submit(kick);

    let result = results.blocking_recv().expect("expiry yields a result");
    let body = result.get().result().unwrap();
    assert_eq!(body.status_code, StatusCode::Error);
    assert_eq!(body.error_code, Some(ErrorCode::Timeout));
    assert!(body.is_final);

    // The late real result from the slow extension must not reach us.
    assert!(results.blocking_recv().is_none());
    std::thread::sleep(Duration::from_millis(700));

    app.close();
    assert_eq!(app.wait(), 0);
}

/// Streams two partial results before the final one.
struct Streamer;

impl Extension for Streamer {
    fn on_cmd(&mut self, env: &mut Env, cmd: SharedMessage) {
        for part in ["part-1", "part-2"] {
            let mut result = Message::cmd_result(StatusCode::Ok, cmd.get()).unwrap();
            {
                let body = result.result_mut().unwrap();
                body.is_final = false;
                body.detail = value::Value::from(part);
            }
            env.return_result(result).unwrap();
        }

        let mut result = Message::cmd_result(StatusCode::Ok, cmd.get()).unwrap();
        result.result_mut().unwrap().detail = value::Value::from("done");
        env.return_result(result).unwrap();
    }
}

#[test]
fn test_streaming_results_forward_until_final() {
    register_addon_as_extension("streamer", |_: &str| {
        Box::new(Streamer) as Box<dyn Extension>
    });

    let app = App::start(options(AppConfig::default())).unwrap();
    let graph_id = start_graph(
        &app,
        json!({
            "nodes": [{"type": "extension", "name": "s", "addon": "streamer",
                       "extension_group": "main"}],
        }),
    );

    let mut poke = Message::cmd("poke").unwrap();
    poke.add_dest(Location::new("", graph_id, "main", "s"));
    let mut results = app.submit(poke);

    let mut details = Vec::new();
    while let Some(result) = results.blocking_recv() {
        let body = result.get().result().unwrap();
        details.push((body.detail.as_str().unwrap().to_string(), body.is_final));
    }
    assert_eq!(
        details,
        vec![
            ("part-1".to_string(), false),
            ("part-2".to_string(), false),
            ("done".to_string(), true),
        ]
    );

    app.close();
    assert_eq!(app.wait(), 0);
}

/// Returns two final results; the second must be dropped.
struct DoubleReplier;

impl Extension for DoubleReplier {
    fn on_cmd(&mut self, env: &mut Env, cmd: SharedMessage) {
        for detail in ["first", "second"] {
            let mut result = Message::cmd_result(StatusCode::Ok, cmd.get()).unwrap();
            result.result_mut().unwrap().detail = value::Value::from(detail);
            env.return_result(result).unwrap();
        }
    }
}

#[test]
fn test_duplicate_final_result_is_dropped() {
    register_addon_as_extension("double_replier", |_: &str| {
        Box::new(DoubleReplier) as Box<dyn Extension>
    });

    let app = App::start(options(AppConfig::default())).unwrap();
    let graph_id = start_graph(
        &app,
        json!({
            "nodes": [{"type": "extension", "name": "d", "addon": "double_replier",
                       "extension_group": "main"}],
        }),
    );

    let mut poke = Message::cmd("poke").unwrap();
    poke.add_dest(Location::new("", graph_id, "main", "d"));
    let mut results = app.submit(poke);

    // The first final arrives; the duplicate is dropped and the channel
    // closes behind the first.
    let result = results.blocking_recv().unwrap();
    assert_eq!(
        result.get().result().unwrap().detail.as_str().unwrap(),
        "first"
    );
    assert!(results.blocking_recv().is_none());

    app.close();
    assert_eq!(app.wait(), 0);
}

/// Replies with whatever the inbound command carries at property `tag`.
struct TagEcho;

impl Extension for TagEcho {
    fn on_cmd(&mut self, env: &mut Env, cmd: SharedMessage) {
        let mut result = Message::cmd_result(StatusCode::Ok, cmd.get()).unwrap();
        result.result_mut().unwrap().detail = cmd
            .get()
            .peek_property("tag")
            .cloned()
            .unwrap_or(value::Value::Null);
        env.return_result(result).unwrap();
    }
}

#[test]
fn test_edge_conversion_rewrites_properties() {
    register_addon_as_extension("conv_client", |_: &str| {
        Box::new(Client) as Box<dyn Extension>
    });
    register_addon_as_extension("conv_server", |_: &str| {
        Box::new(TagEcho) as Box<dyn Extension>
    });

    let app = App::start(options(AppConfig::default())).unwrap();
    let graph_id = start_graph(
        &app,
        json!({
            "nodes": [
                {"type": "extension", "name": "client", "addon": "conv_client",
                 "extension_group": "front"},
                {"type": "extension", "name": "server", "addon": "conv_server",
                 "extension_group": "back"},
            ],
            "connections": [
                {"extension": "client",
                 "cmd": [{"name": "hello", "dest": [{
                     "extension": "server",
                     "msg_conversion": {
                         "type": "per_property",
                         "rules": [{"path": "tag", "conversion_mode": "fixed_value",
                                    "value": "rewritten"}],
                     },
                 }]}]},
            ],
        }),
    );

    let mut kick = Message::cmd("kick").unwrap();
    kick.add_dest(Location::new("", graph_id, "front", "client"));
    let mut results = app.submit(kick);

    let result = results.blocking_recv().unwrap();
    let body = result.get().result().unwrap();
    assert_eq!(body.status_code, StatusCode::Ok);
    assert_eq!(body.detail.as_str().unwrap(), "rewritten");

    app.close();
    assert_eq!(app.wait(), 0);
}

/// Starts an engine timer on its first command and answers that command
/// once the timer has fired twice.
struct TimerUser {
    kick: Option<SharedMessage>,
    fired: u32,
}

impl Extension for TimerUser {
    fn on_cmd(&mut self, env: &mut Env, cmd: SharedMessage) {
        match cmd.get().msg_type() {
            MsgType::Timeout => {
                self.fired += 1;
                if self.fired == 2 {
                    let kick = self.kick.take().unwrap();
                    let mut reply = Message::cmd_result(StatusCode::Ok, kick.get()).unwrap();
                    reply.result_mut().unwrap().detail = value::Value::from("fired twice");
                    env.return_result(reply).unwrap();
                }
            }
            _ => {
                self.kick = Some(cmd);
                env.send(Message::timer(message::TimerBody {
                    timer_id: 1,
                    timeout_us: 50_000,
                    times: 2,
                }))
                .unwrap();
            }
        }
    }
}

#[test]
fn test_builtin_timer_fires_the_requested_times() {
    register_addon_as_extension("timer_user", |_: &str| {
        Box::new(TimerUser {
            kick: None,
            fired: 0,
        }) as Box<dyn Extension>
    });

    let app = App::start(options(AppConfig::default())).unwrap();
    let graph_id = start_graph(
        &app,
        json!({
            "nodes": [{"type": "extension", "name": "t", "addon": "timer_user",
                       "extension_group": "main"}],
        }),
    );

    let mut kick = Message::cmd("kick").unwrap();
    kick.add_dest(Location::new("", graph_id, "main", "t"));
    let mut results = app.submit(kick);

    let result = results.blocking_recv().expect("two firings yield the reply");
    assert_eq!(
        result.get().result().unwrap().detail.as_str().unwrap(),
        "fired twice"
    );

    app.close();
    assert_eq!(app.wait(), 0);
}

/// On a command, fans a small data frame out through the graph and
/// acknowledges immediately.
struct DataKicker;

impl Extension for DataKicker {
    fn on_cmd(&mut self, env: &mut Env, cmd: SharedMessage) {
        let mut data = Message::data("pcm").unwrap();
        data.alloc_buf(3).unwrap();
        let (token, region) = data.lock_buf().unwrap();
        region.copy_from_slice(&[1, 2, 3]);
        data.unlock_buf(token).unwrap();
        env.send(data).unwrap();

        let reply = Message::cmd_result(StatusCode::Ok, cmd.get()).unwrap();
        env.return_result(reply).unwrap();
    }
}

/// Records every data payload it receives into a shared log.
struct DataSink {
    tag: &'static str,
    seen: Arc<Mutex<Vec<(&'static str, Vec<u8>)>>>,
}

impl Extension for DataSink {
    fn on_data(&mut self, _env: &mut Env, data: SharedMessage) {
        let Body::Data(body) = data.get().body() else {
            return;
        };
        self.seen
            .lock()
            .unwrap()
            .push((self.tag, body.buf.as_slice().to_vec()));
    }
}

#[test]
fn test_data_frames_fan_out_to_every_edge() {
    let seen: Arc<Mutex<Vec<(&'static str, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));

    register_addon_as_extension("data_kicker", |_: &str| {
        Box::new(DataKicker) as Box<dyn Extension>
    });
    for tag in ["left", "right"] {
        let seen = seen.clone();
        register_addon_as_extension(&format!("data_sink_{tag}"), move |_: &str| {
            Box::new(DataSink {
                tag,
                seen: seen.clone(),
            }) as Box<dyn Extension>
        });
    }

    let app = App::start(options(AppConfig::default())).unwrap();
    let graph_id = start_graph(
        &app,
        json!({
            "nodes": [
                {"type": "extension", "name": "kicker", "addon": "data_kicker",
                 "extension_group": "front"},
                {"type": "extension", "name": "left", "addon": "data_sink_left",
                 "extension_group": "back"},
                {"type": "extension", "name": "right", "addon": "data_sink_right",
                 "extension_group": "back"},
            ],
            "connections": [
                {"extension": "kicker",
                 "data": [{"name": "pcm", "dest": [
                     {"extension": "left"},
                     {"extension": "right"},
                 ]}]},
            ],
        }),
    );

    let mut kick = Message::cmd("kick").unwrap();
    kick.add_dest(Location::new("", graph_id, "front", "kicker"));
    let mut results = app.submit(kick);
    results.blocking_recv().expect("kick is acknowledged");

    // Both sinks observe the same payload, shortly after the ack.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        {
            let seen = seen.lock().unwrap();
            if seen.len() == 2 {
                assert!(seen.iter().all(|(_, bytes)| bytes == &[1, 2, 3]));
                let tags: Vec<_> = seen.iter().map(|(tag, _)| *tag).collect();
                assert!(tags.contains(&"left") && tags.contains(&"right"));
                break;
            }
        }
        assert!(std::time::Instant::now() < deadline, "sinks never saw the frame");
        std::thread::sleep(Duration::from_millis(10));
    }

    app.close();
    assert_eq!(app.wait(), 0);
}

/// Ships its EnvProxy out to the test thread when started.
struct ProxySource {
    tx: mpsc::Sender<EnvProxy>,
}

impl Extension for ProxySource {
    fn on_start(&mut self, env: &mut Env) {
        self.tx.send(env.proxy()).unwrap();
        env.on_start_done();
    }
}

#[test]
fn test_proxy_notifies_apply_in_issue_order() {
    let (tx, rx) = mpsc::channel();
    let tx = Arc::new(Mutex::new(tx));
    register_addon_as_extension("proxy_source", move |_: &str| {
        Box::new(ProxySource {
            tx: tx.lock().unwrap().clone(),
        }) as Box<dyn Extension>
    });

    let app = App::start(options(AppConfig::default())).unwrap();
    start_graph(
        &app,
        json!({
            "nodes": [{"type": "extension", "name": "source", "addon": "proxy_source",
                       "extension_group": "main"}],
        }),
    );

    let proxy = rx.recv_timeout(Duration::from_secs(5)).unwrap();

    proxy.notify(|env: &mut Env| env.set_property("x", value::Value::Int64(1)).unwrap());
    proxy.notify(|env: &mut Env| env.set_property("x", value::Value::Int64(2)).unwrap());

    let seen = Arc::new(Mutex::new(None));
    let out = seen.clone();
    proxy
        .notify_sync(move |env: &mut Env| {
            *out.lock().unwrap() = Some(env.get_property("x").unwrap());
        })
        .unwrap();
    assert_eq!(seen.lock().unwrap().take(), Some(value::Value::Int64(2)));

    // notify_sync from the env's own thread is refused rather than
    // deadlocking.
    let inner = proxy.clone();
    let verdict = Arc::new(Mutex::new(None));
    let out = verdict.clone();
    proxy
        .notify_sync(move |_env: &mut Env| {
            *out.lock().unwrap() = Some(inner.notify_sync(|_| ()).is_err());
        })
        .unwrap();
    assert_eq!(verdict.lock().unwrap().take(), Some(true));

    app.close();
    assert_eq!(app.wait(), 0);
}
