//! Host side of the port controller.
//!
//! Two tokio tasks sit between the process streams and the machine:
//!
//! - the input pump reads bytes and feeds them to `IN` over a bounded channel,
//!   closing the channel on end-of-stream so buffered bytes are drained before
//!   the machine halts;
//! - the output pump renders every value emitted by `OUT` as a character and
//!   flushes whenever the queue runs dry or a `WAIT` barrier arrives.
//!
//! [`run`] wires both pumps to a [`ChannelPorts`] controller and drives the
//! interpreter on a blocking thread.

use crate::virtual_machine::Cell;
use crate::virtual_machine::errors::Fault;
use crate::virtual_machine::image::Image;
use crate::virtual_machine::ports::{ChannelPorts, HaltSignal, OutputEvent};
use crate::virtual_machine::stack::{ADDRESS_STACK_DEPTH, DATA_STACK_DEPTH};
use crate::virtual_machine::vm::{RunReport, VM};
use crate::{debug, warn};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{Sender, UnboundedReceiver, channel, unbounded_channel};
use tokio::task::JoinError;

/// Bytes buffered between the input pump and `IN`.
pub const INPUT_BUFFER: usize = 1024;

/// Largest read issued by the input pump.
const INPUT_CHUNK: usize = 256;

/// Errors from the host plumbing around a run (not from the machine itself).
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("interpreter thread failed: {0}")]
    Interpreter(#[source] JoinError),
    #[error("output pump failed: {0}")]
    OutputTask(#[source] JoinError),
    #[error("output write failed: {0}")]
    Output(#[from] io::Error),
}

/// Depth limits for the two stacks of a machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StackDepths {
    pub data: usize,
    pub address: usize,
}

impl Default for StackDepths {
    fn default() -> Self {
        Self {
            data: DATA_STACK_DEPTH,
            address: ADDRESS_STACK_DEPTH,
        }
    }
}

/// Per-run machine settings.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunOptions {
    pub depths: StackDepths,
    /// Treat `WAIT` as a request to halt once pending output is written.
    pub halt_on_wait: bool,
}

/// What a finished run produced.
#[derive(Debug)]
pub struct Outcome<W> {
    /// How the machine stopped.
    pub result: Result<RunReport, Fault>,
    /// The output writer, after every emitted value was written and flushed.
    pub writer: W,
}

/// Maps an emitted cell to the character written to the host output.
///
/// Cells that are not Unicode scalar values render as U+FFFD.
pub fn render_cell(cell: Cell) -> char {
    u32::try_from(cell)
        .ok()
        .and_then(char::from_u32)
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}

/// Forwards bytes from `reader` to `sender` until end-of-stream, a read error,
/// the machine hanging up, or `halt`.
///
/// Dropping `sender` on return is what tells `IN` that no more input will come.
/// Returns the number of bytes forwarded.
pub async fn input_pump<R>(mut reader: R, sender: Sender<u8>, halt: HaltSignal) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; INPUT_CHUNK];
    let mut forwarded = 0;
    loop {
        let n = tokio::select! {
            biased;
            _ = halt.raised() => return forwarded,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("input closed after {} bytes", forwarded);
                    return forwarded;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("input read failed: {}", e);
                    return forwarded;
                }
            },
        };
        for &byte in &buf[..n] {
            tokio::select! {
                biased;
                _ = halt.raised() => return forwarded,
                sent = sender.send(byte) => {
                    if sent.is_err() {
                        return forwarded;
                    }
                }
            }
            forwarded += 1;
        }
    }
}

/// Writes every emitted value to `writer` until the machine drops its sender.
///
/// Output is buffered, and flushed when the queue is drained and on every
/// `WAIT` barrier before it is acknowledged. Returns the writer once the
/// channel is closed and everything has been flushed.
pub async fn output_pump<W>(writer: W, mut receiver: UnboundedReceiver<OutputEvent>) -> io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    let mut out = BufWriter::new(writer);
    let mut utf8 = [0u8; 4];
    while let Some(event) = receiver.recv().await {
        match event {
            OutputEvent::Emit(cell) => {
                let encoded = render_cell(cell).encode_utf8(&mut utf8);
                out.write_all(encoded.as_bytes()).await?;
                if receiver.is_empty() {
                    out.flush().await?;
                }
            }
            OutputEvent::Sync(ack) => {
                out.flush().await?;
                // the machine may have halted while waiting
                let _ = ack.send(());
            }
        }
    }
    out.flush().await?;
    Ok(out.into_inner())
}

/// Runs `image` to completion with `reader` as input and `writer` as output.
///
/// Must be called from within a multi-threaded tokio runtime. The machine runs
/// on a blocking thread; raising `halt` from anywhere stops it after the
/// current instruction.
pub async fn run<R, W>(
    image: Image,
    options: RunOptions,
    reader: R,
    writer: W,
    halt: HaltSignal,
) -> Result<Outcome<W>, HostError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (in_tx, in_rx) = channel(INPUT_BUFFER);
    let (out_tx, out_rx) = unbounded_channel();

    let input = tokio::spawn(input_pump(reader, in_tx, halt.clone()));
    let output = tokio::spawn(output_pump(writer, out_rx));

    let mut ports = ChannelPorts::new(in_rx, out_tx, halt.clone(), Handle::current());
    if options.halt_on_wait {
        ports = ports.halt_on_wait();
    }
    let depths = options.depths;
    let result = tokio::task::spawn_blocking(move || {
        let mut vm = VM::with_depths(image, ports, depths.data, depths.address);
        vm.run()
    })
    .await
    .map_err(HostError::Interpreter)?;

    // machine gone: stop reading and let the output pump drain
    halt.raise();
    let writer = output.await.map_err(HostError::OutputTask)??;
    if let Ok(forwarded) = input.await {
        debug!("input pump forwarded {} bytes", forwarded);
    }

    Ok(Outcome { result, writer })
}
