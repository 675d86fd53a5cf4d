//! Port controller: the boundary between the synchronous interpreter and the
//! asynchronous host.
//!
//! The interpreter only ever talks to the host through the [`Ports`] trait
//! while executing `IN`, `OUT` and `WAIT`, and polls [`Ports::halt_requested`]
//! after every instruction. Two implementations are provided:
//!
//! - [`ChannelPorts`]: tokio channels fed and drained by the host pumps in
//!   [`crate::host`]. `IN` is the machine's only suspension point.
//! - [`ScriptedPorts`]: a scripted byte sequence and an output capture
//!   buffer, for tests and benchmarks.

use crate::virtual_machine::Cell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tokio::sync::{Notify, oneshot};

/// Host-side boundary seen by the interpreter.
pub trait Ports {
    /// Blocks until the host supplies the next input byte.
    ///
    /// Returns `None` when no byte will ever arrive (input exhausted or halt
    /// raised); the halt signal is raised before returning `None`.
    fn request_input(&mut self) -> Option<Cell>;

    /// Hands `value` to the host output. Never blocks on the host.
    fn emit_output(&mut self, value: Cell);

    /// Handshake with the host: returns once the host has caught up with
    /// everything emitted so far, or once halt is raised.
    fn wait(&mut self);

    /// Non-blocking check of the halt signal.
    fn halt_requested(&self) -> bool;
}

#[derive(Debug, Default)]
struct HaltState {
    raised: AtomicBool,
    notify: Notify,
}

/// One-shot, idempotent halt flag shared between the machine and the host.
#[derive(Clone, Debug, Default)]
pub struct HaltSignal {
    inner: Arc<HaltState>,
}

impl HaltSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes everything awaiting [`HaltSignal::raised`].
    ///
    /// Returns `true` only for the call that actually set it.
    pub fn raise(&self) -> bool {
        let first = !self.inner.raised.swap(true, Ordering::AcqRel);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    #[inline(always)]
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// Resolves once the flag is set.
    pub async fn raised(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

/// Events flowing from the machine to the host output pump.
#[derive(Debug)]
pub enum OutputEvent {
    /// A value emitted by `OUT`.
    Emit(Cell),
    /// `WAIT` barrier; acknowledged once everything before it is flushed.
    Sync(oneshot::Sender<()>),
}

/// Port controller backed by tokio channels.
///
/// Must be driven from a thread where blocking is allowed (e.g. inside
/// `tokio::task::spawn_blocking`), since `IN` and `WAIT` block on `handle`.
///
/// The output queue is unbounded so `OUT` never blocks the interpreter. If the
/// host sink stalls while an image keeps emitting, the queue grows without
/// limit; images that emit a lot should issue `WAIT` periodically, which
/// blocks until the output pump has caught up.
pub struct ChannelPorts {
    input: Receiver<u8>,
    output: UnboundedSender<OutputEvent>,
    halt: HaltSignal,
    handle: Handle,
    halt_on_wait: bool,
}

impl ChannelPorts {
    pub fn new(
        input: Receiver<u8>,
        output: UnboundedSender<OutputEvent>,
        halt: HaltSignal,
        handle: Handle,
    ) -> Self {
        Self {
            input,
            output,
            halt,
            handle,
            halt_on_wait: false,
        }
    }

    /// Maps `WAIT` to a halt request, so an image can end its run cleanly.
    ///
    /// Everything emitted before the `WAIT` is still written out: the output
    /// pump drains the queue once the machine drops its sender.
    pub fn halt_on_wait(mut self) -> Self {
        self.halt_on_wait = true;
        self
    }
}

impl Ports for ChannelPorts {
    fn request_input(&mut self) -> Option<Cell> {
        if self.halt.is_raised() {
            return None;
        }
        let input = &mut self.input;
        let halt = &self.halt;
        let byte = self.handle.block_on(async {
            tokio::select! {
                biased;
                _ = halt.raised() => None,
                byte = input.recv() => byte,
            }
        });
        match byte {
            Some(b) => Some(Cell::from(b)),
            None => {
                // sender closed: the host input is exhausted
                self.halt.raise();
                None
            }
        }
    }

    fn emit_output(&mut self, value: Cell) {
        if self.output.send(OutputEvent::Emit(value)).is_err() {
            self.halt.raise();
        }
    }

    fn wait(&mut self) {
        if self.halt_on_wait {
            self.halt.raise();
            return;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.output.send(OutputEvent::Sync(ack_tx)).is_err() {
            self.halt.raise();
            return;
        }
        let halt = &self.halt;
        self.handle.block_on(async {
            tokio::select! {
                _ = halt.raised() => {}
                _ = ack_rx => {}
            }
        });
    }

    #[inline(always)]
    fn halt_requested(&self) -> bool {
        self.halt.is_raised()
    }
}

/// Synthetic boundary: input comes from a fixed byte script and output is
/// captured in memory.
#[derive(Debug, Default)]
pub struct ScriptedPorts {
    input: VecDeque<u8>,
    output: Vec<Cell>,
    halt: HaltSignal,
    halt_on_wait: bool,
    waits: usize,
}

impl ScriptedPorts {
    /// Boundary that will deliver `input` and then report end-of-stream.
    pub fn new(input: impl IntoIterator<Item = u8>) -> Self {
        Self {
            input: input.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Maps `WAIT` to a halt request.
    pub fn halt_on_wait(mut self) -> Self {
        self.halt_on_wait = true;
        self
    }

    /// Values emitted so far, in emission order.
    pub fn output(&self) -> &[Cell] {
        &self.output
    }

    /// Input bytes not consumed yet.
    pub fn remaining_input(&self) -> usize {
        self.input.len()
    }

    /// Number of `WAIT` handshakes performed.
    pub fn waits(&self) -> usize {
        self.waits
    }

    pub fn halt_signal(&self) -> &HaltSignal {
        &self.halt
    }
}

impl Ports for ScriptedPorts {
    fn request_input(&mut self) -> Option<Cell> {
        if self.halt.is_raised() {
            return None;
        }
        match self.input.pop_front() {
            Some(b) => Some(Cell::from(b)),
            None => {
                self.halt.raise();
                None
            }
        }
    }

    fn emit_output(&mut self, value: Cell) {
        self.output.push(value);
    }

    fn wait(&mut self) {
        self.waits += 1;
        if self.halt_on_wait {
            self.halt.raise();
        }
    }

    fn halt_requested(&self) -> bool {
        self.halt.is_raised()
    }
}
