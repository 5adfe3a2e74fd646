//! Full sessions over in-memory pipes against a scripted fake interpreter.

use std::collections::{BTreeSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use moonlit_config::{DebuggerConfig, ServerConfig};
use moonlit_dap::bridge::DebugService;
use moonlit_dap::transport::FrameDecoder;
use moonlit_dap::{
    ActionKind, DebugBridge, DebugServer, DebugValue, Debugger, SourceCode, SourceRef, WatchItem,
    WatchType,
};
use serde_json::{json, Value};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

// ── pipes ───────────────────────────────────────────────────────────────────

struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = out.len().min(self.chunk.len() - self.pos);
        out[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

struct ChannelWriter(Sender<Vec<u8>>);

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The IDE side of a connection.
struct Client {
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
    decoder: FrameDecoder,
    pending: VecDeque<Value>,
    seq: i64,
}

impl Client {
    fn request(&mut self, command: &str, arguments: Value) -> i64 {
        self.seq += 1;
        let body = serde_json::to_vec(&json!({
            "seq": self.seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        }))
        .unwrap();
        let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        frame.extend(body);
        self.tx.as_ref().unwrap().send(frame).unwrap();
        self.seq
    }

    fn wait_for(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        loop {
            if let Some(i) = self.pending.iter().position(|m| pred(m)) {
                return self.pending.remove(i).unwrap();
            }
            let chunk = self
                .rx
                .recv_timeout(TIMEOUT)
                .expect("timed out waiting for a message");
            self.decoder.push(&chunk);
            while let Some(body) = self.decoder.next_body() {
                self.pending.push_back(serde_json::from_slice(&body).unwrap());
            }
        }
    }

    fn call(&mut self, command: &str, arguments: Value) -> Value {
        let seq = self.request(command, arguments);
        self.wait_for(|m| m["type"] == "response" && m["request_seq"] == seq)
    }

    fn event(&mut self, name: &str) -> Value {
        self.wait_for(|m| m["type"] == "event" && m["event"] == name)
    }

    fn output(&mut self, text: &str) -> Value {
        let line = format!("{text}\n");
        self.wait_for(|m| m["event"] == "output" && m["body"]["output"] == line.as_str())
    }
}

fn pipes() -> (Client, ChannelReader, ChannelWriter) {
    let (to_server, from_client) = unbounded();
    let (to_client, from_server) = unbounded();
    let client = Client {
        tx: Some(to_server),
        rx: from_server,
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
        seq: 0,
    };
    let reader = ChannelReader {
        rx: from_client,
        chunk: Vec::new(),
        pos: 0,
    };
    (client, reader, ChannelWriter(to_client))
}

// ── fake interpreter ────────────────────────────────────────────────────────

/// A script whose statements start on lines 1, 3, 5 and 7.
struct FakeService {
    armed: Mutex<BTreeSet<i64>>,
}

impl FakeService {
    const VALID_LINES: [i64; 4] = [1, 3, 5, 7];

    fn armed(&self) -> BTreeSet<i64> {
        self.armed.lock().unwrap().clone()
    }
}

impl DebugService for FakeService {
    fn reset_breakpoints(&self, _source_id: usize, lines: &BTreeSet<i64>) -> BTreeSet<i64> {
        let applied: BTreeSet<i64> = lines
            .iter()
            .copied()
            .filter(|l| Self::VALID_LINES.contains(l))
            .collect();
        *self.armed.lock().unwrap() = applied.clone();
        applied
    }

    fn evaluate(&self, expression: &str) -> Result<DebugValue, String> {
        match expression {
            "answer" => Ok(DebugValue::Number(42.0)),
            other => Err(format!("undefined variable '{other}'")),
        }
    }
}

struct Fixture {
    server: DebugServer,
    bridge: Arc<DebugBridge>,
    service: Arc<FakeService>,
    path: String,
    _dir: TempDir,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("s.lua");
    std::fs::write(&script, "local a = 1\n\nprint(a)\n").unwrap();
    let path = script.to_string_lossy().into_owned();

    let debugger = DebuggerConfig {
        temp_dir: Some(dir.path().to_path_buf()),
        ..DebuggerConfig::default()
    };
    let server = DebugServer::with_configs(ServerConfig::default(), debugger);
    let bridge = server.attach_script("s.lua", None);

    let service = Arc::new(FakeService {
        armed: Mutex::new(BTreeSet::new()),
    });
    bridge.set_debug_service(service.clone());
    bridge.set_source_code(SourceCode::new(0, path.clone(), "local a = 1\n\nprint(a)\n"));

    Fixture {
        server,
        bridge,
        service,
        path,
        _dir: dir,
    }
}

fn wait_until_bound(bridge: &DebugBridge) {
    let deadline = Instant::now() + TIMEOUT;
    while bridge.current_binding().is_none() {
        assert!(Instant::now() < deadline, "client never bound");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Publish state for `line` and block for the next action.
fn stop_at(bridge: &DebugBridge, line: i64) -> ActionKind {
    let here = SourceRef::line(0, line);
    bridge.update(
        WatchType::CallStack,
        vec![WatchItem::named("main chunk").with_location(here)],
    );
    bridge.update(
        WatchType::Locals,
        vec![WatchItem::named("a").with_value(DebugValue::Number(line as f64))],
    );
    bridge.get_action(line as usize, Some(here)).kind
}

/// Stop on entry, then run lines 2..=8 stopping at armed breakpoints.
fn run_script(bridge: &DebugBridge, service: &FakeService) -> Vec<(i64, ActionKind)> {
    wait_until_bound(bridge);
    let mut stops = vec![(1, stop_at(bridge, 1))];
    for line in 2..=8 {
        if service.armed().contains(&line) || bridge.is_pause_requested() {
            stops.push((line, stop_at(bridge, line)));
        }
    }
    bridge.signal_execution_ended();
    stops
}

// ── scenarios ───────────────────────────────────────────────────────────────

#[test]
fn zero_based_client_hits_breakpoint_and_reads_stack() {
    let fx = fixture();
    let (mut client, reader, writer) = pipes();

    thread::scope(|s| {
        let session = s.spawn(|| fx.server.run_session(reader, writer));
        let script = s.spawn(|| run_script(&fx.bridge, &fx.service));

        let init = client.call("initialize", json!({"linesStartAt1": false, "pathFormat": "path"}));
        assert_eq!(init["success"], true);
        assert_eq!(init["body"]["supportsConditionalBreakpoints"], false);
        assert_eq!(init["body"]["exceptionBreakpointFilters"], json!([]));
        let initialized = client.event("initialized");
        assert!(initialized["seq"].as_i64() > init["seq"].as_i64());
        client.output(&format!("Loaded source '{}'", fx.path));

        let entry = client.event("stopped");
        assert_eq!(entry["body"]["reason"], "step");
        assert_eq!(entry["body"]["threadId"], 0);

        let bps = client.call(
            "setBreakpoints",
            json!({"source": {"path": fx.path}, "lines": [0, 4]}),
        );
        assert_eq!(
            bps["body"]["breakpoints"],
            json!([{"verified": true, "line": 0}, {"verified": true, "line": 4}])
        );
        assert_eq!(fx.service.armed(), BTreeSet::from([1, 5]));

        let cont = client.call("continue", json!({"threadId": 0}));
        assert_eq!(cont["success"], true);
        let hit = client.event("stopped");
        assert_eq!(hit["body"]["reason"], "step");

        let trace = client.call("stackTrace", json!({"threadId": 0}));
        let frames = trace["body"]["stackFrames"].as_array().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0]["name"], "main chunk");
        assert_eq!(frames[0]["line"], 4);
        assert_eq!(frames[0]["source"]["path"], fx.path.as_str());
        assert_eq!(frames[1]["name"], "(main coroutine)");
        assert_eq!(frames[2]["name"], "(native)");

        let locals = client.call("variables", json!({"variablesReference": 65536}));
        assert_eq!(locals["body"]["variables"][0]["value"], "5");

        let eval = client.call("evaluate", json!({"expression": "answer", "context": "watch"}));
        assert_eq!(eval["body"]["result"], "42");

        let bye = client.call("disconnect", json!({}));
        assert_eq!(bye["success"], true);

        session.join().unwrap().unwrap();
        let stops = script.join().unwrap();
        // Disconnecting while stopped at line 5 resumes the script.
        assert_eq!(stops, vec![(1, ActionKind::Run), (5, ActionKind::Run)]);
    });
    assert!(fx.bridge.current_binding().is_none());
}

#[test]
fn breakpoints_verified_only_on_statement_lines() {
    let fx = fixture();
    let (mut client, reader, writer) = pipes();

    thread::scope(|s| {
        let session = s.spawn(|| fx.server.run_session(reader, writer));

        client.call("initialize", json!({"pathFormat": "path"}));
        let resp = client.call(
            "setBreakpoints",
            json!({"source": {"path": fx.path}, "lines": [3, 7, 42]}),
        );
        assert_eq!(
            resp["body"]["breakpoints"],
            json!([
                {"verified": true, "line": 3},
                {"verified": true, "line": 7},
                {"verified": false, "line": 42}
            ])
        );

        let unknown = client.call(
            "setBreakpoints",
            json!({"source": {"path": "/nowhere/x.lua"}, "lines": [3]}),
        );
        assert_eq!(unknown["body"]["breakpoints"], json!([]));

        let bogus = client.call("restartFrame", json!({}));
        assert_eq!(bogus["success"], false);
        assert_eq!(bogus["body"]["error"]["id"], 1014);

        // Closing the input ends the session without a disconnect request.
        client.tx = None;
        session.join().unwrap().unwrap();
    });
    assert!(fx.bridge.current_binding().is_none());
}

#[test]
fn host_detach_closes_client_and_releases_script() {
    let fx = fixture();
    let (mut client, reader, writer) = pipes();

    thread::scope(|s| {
        let session = s.spawn(|| fx.server.run_session(reader, writer));
        let script = s.spawn(|| run_script(&fx.bridge, &fx.service));

        client.call("initialize", json!({"pathFormat": "path"}));
        client.event("stopped");

        fx.server.detach(fx.bridge.id()).unwrap();
        client.output("Debug session has been closed by the hosting process.");
        client.output("Bye.");
        client.event("terminated");

        let stops = script.join().unwrap();
        assert_eq!(stops, vec![(1, ActionKind::Run)]);

        client.call("disconnect", json!({}));
        session.join().unwrap().unwrap();
    });
    assert!(fx.server.attached_debuggers().is_empty());
}

#[test]
fn repl_lists_scripts_and_toggles_exec_end_notification() {
    let fx = fixture();
    let other = fx.server.attach_script("other.lua", None);
    let (mut client, reader, writer) = pipes();

    thread::scope(|s| {
        let session = s.spawn(|| fx.server.run_session(reader, writer));
        let script = s.spawn(|| run_script(&fx.bridge, &fx.service));

        client.call("initialize", json!({"pathFormat": "path"}));
        client.event("stopped");

        client.call("evaluate", json!({"expression": "!list", "context": "repl"}));
        client.output(&format!("{:>9} : s.lua (default) (this)", fx.bridge.id()));
        client.output(&format!("{:>9} : other.lua", other.id()));

        client.call("evaluate", json!({"expression": "!execendnotify on", "context": "repl"}));
        client.output("Notifications of execution end are : enabled");

        client.call("continue", json!({}));
        client.output("Execution ended.");
        assert_eq!(script.join().unwrap(), vec![(1, ActionKind::Run)]);

        client.call("evaluate", json!({"expression": "!select 999999", "context": "repl"}));
        client.output("Error selecting debugger: cannot find debugger with id 999999");

        client.call("disconnect", json!({}));
        session.join().unwrap().unwrap();
    });
}
