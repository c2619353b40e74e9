//! The serving loop: one reader task feeds a bounded queue; a pool of
//! worker threads drains it. Mutating requests of a session apply in
//! submission order through a sequence gate; read-only requests run
//! concurrently. Response lines are written atomically.

use std::collections::BTreeSet;
use std::io::{BufRead, Write};

use crossbeam_channel::bounded;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use anvil_types::{AgentId, RoleRuleset};

use crate::dispatch::{dispatch_line, is_read_only};
use crate::messages::{RequestFrame, ResponseFrame};
use crate::session::Session;
use crate::Core;

/// Orders mutating requests by their submission sequence number.
///
/// Every request receives a sequence number from the reader. Read-only
/// requests mark themselves done immediately; mutating requests wait until
/// every earlier request is done before executing.
struct SequenceGate {
    inner: Mutex<GateState>,
    cv: Condvar,
}

#[derive(Default)]
struct GateState {
    /// Lowest sequence number not yet done.
    next: u64,
    /// Out-of-order completions ahead of `next`.
    done: BTreeSet<u64>,
}

impl SequenceGate {
    fn new() -> Self {
        Self {
            inner: Mutex::new(GateState::default()),
            cv: Condvar::new(),
        }
    }

    /// Block until every request before `seq` has completed.
    fn wait_turn(&self, seq: u64) {
        let mut state = self.inner.lock();
        while state.next != seq {
            self.cv.wait(&mut state);
        }
    }

    /// Mark `seq` complete and advance past any queued completions.
    fn mark_done(&self, seq: u64) {
        let mut state = self.inner.lock();
        state.done.insert(seq);
        loop {
            let next = state.next;
            if !state.done.remove(&next) {
                break;
            }
            state.next += 1;
        }
        self.cv.notify_all();
    }
}

struct Job {
    seq: u64,
    line: String,
}

/// Serve one connection: read request lines from `reader`, dispatch them
/// on the worker pool, and write response frames to `writer`.
///
/// Returns when the input stream ends and every in-flight request has
/// finished.
pub fn serve<R, W>(
    core: &Core,
    reader: R,
    writer: W,
    agent: AgentId,
    ruleset: RoleRuleset,
) -> std::io::Result<()>
where
    R: BufRead,
    W: Write + Send,
{
    let session = Mutex::new(Session::new(agent, ruleset));
    let writer = Mutex::new(writer);
    let gate = SequenceGate::new();
    let workers = core.store.config.worker_threads.max(1);
    let (tx, rx) = bounded::<Job>(core.store.config.queue_depth);

    info!(
        session = session.lock().session_id.as_str(),
        workers, "serving connection"
    );

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let rx = rx.clone();
            let session = &session;
            let writer = &writer;
            let gate = &gate;
            scope.spawn(move || {
                while let Ok(job) = rx.recv() {
                    run_job(core, session, writer, gate, job);
                }
            });
        }
        drop(rx);

        let mut seq = 0u64;
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            if tx.send(Job { seq, line }).is_err() {
                break;
            }
            seq += 1;
        }
        drop(tx);
    });

    let result = writer.lock().flush();
    result
}

fn run_job(
    core: &Core,
    session: &Mutex<Session>,
    writer: &Mutex<impl Write>,
    gate: &SequenceGate,
    job: Job,
) {
    // Peek at the method to decide whether this request takes its turn in
    // the mutation order or runs immediately.
    let read_only = serde_json::from_str::<RequestFrame>(&job.line)
        .map(|frame| is_read_only(&frame.method))
        .unwrap_or(true);

    if read_only {
        gate.mark_done(job.seq);
    } else {
        gate.wait_turn(job.seq);
    }

    let emit = |frame: ResponseFrame| {
        let mut w = writer.lock();
        // A failed write means the peer is gone; frames are best-effort
        // from here on.
        let _ = writeln!(w, "{}", frame.to_line());
        let _ = w.flush();
    };
    dispatch_line(core, session, &job.line, &emit);
    debug!(seq = job.seq, "request complete");

    if !read_only {
        gate.mark_done(job.seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_orders_out_of_order_completions() {
        let gate = SequenceGate::new();
        gate.mark_done(1);
        gate.mark_done(2);
        {
            let state = gate.inner.lock();
            assert_eq!(state.next, 0, "0 still pending");
        }
        gate.mark_done(0);
        let state = gate.inner.lock();
        assert_eq!(state.next, 3);
        assert!(state.done.is_empty());
    }

    #[test]
    fn serve_round_trips_requests() {
        let core = Core::ephemeral();
        let input = concat!(
            r#"{"version":"1.0","method":"entity.create.point","params":{"coordinates":[1.0,2.0,3.0]},"id":1}"#,
            "\n",
            r#"{"version":"1.0","method":"entity.list","params":{},"id":2}"#,
            "\n",
            "not json\n",
        );
        let mut output: Vec<u8> = Vec::new();
        serve(
            &core,
            input.as_bytes(),
            &mut output,
            AgentId::new("tester"),
            RoleRuleset::unrestricted(),
        )
        .unwrap();

        let text = String::from_utf8(output).unwrap();
        let frames: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(frames.len(), 3);
        assert!(frames
            .iter()
            .any(|f| f["id"] == 1 && f["result"]["entity_type"] == "point"));
        assert!(frames.iter().any(|f| f["id"] == 2));
        assert!(frames
            .iter()
            .any(|f| f["id"].is_null() && f["error"]["code"] == "ParseError"));
    }
}
