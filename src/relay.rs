//! Relay from an isolated worker back to the thread driving `listen()`.
//!
//! In-process workers push [`Theme`] values through a bounded channel.
//! Worker processes write one theme name per line to a pipe, read back with
//! [`LineRelay`].

use std::io::{self, BufRead, BufReader, Lines, Read, Write};
use std::sync::{Arc, Weak};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::warn;

use crate::error::RelayError;
use crate::theme::Theme;

pub fn channel(capacity: usize) -> (RelaySender, RelayReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    let alive = Arc::new(());
    let sender = RelaySender {
        tx,
        evict: rx.clone(),
        receiver_alive: Arc::downgrade(&alive),
    };
    (sender, RelayReceiver { rx, _alive: alive })
}

/// Sending end of [`channel`].
///
/// Producers filter their readings before pushing, so the newest reading is
/// the one that must reach the receiver. A full relay evicts the oldest.
#[derive(Clone, Debug)]
pub struct RelaySender {
    tx: Sender<Theme>,
    evict: Receiver<Theme>,
    receiver_alive: Weak<()>,
}

impl RelaySender {
    /// Queues `theme` without blocking. Returns `false` once the receiving
    /// side is gone.
    pub fn push(&self, theme: Theme) -> bool {
        let mut theme = theme;
        loop {
            if self.receiver_alive.strong_count() == 0 {
                return false;
            }
            match self.tx.try_send(theme) {
                Ok(()) => return true,
                Err(TrySendError::Full(rejected)) => {
                    if let Ok(stale) = self.evict.try_recv() {
                        warn!(%stale, "relay full, dropping oldest reading");
                    }
                    theme = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }
}

/// Receiving end of [`channel`]. Iterating blocks until every sender is dropped.
#[derive(Debug)]
pub struct RelayReceiver {
    rx: Receiver<Theme>,
    _alive: Arc<()>,
}

impl RelayReceiver {
    /// Readings already queued, without blocking.
    pub fn pending(&self) -> impl Iterator<Item = Theme> + '_ {
        self.rx.try_iter()
    }
}

impl Iterator for RelayReceiver {
    type Item = Theme;

    fn next(&mut self) -> Option<Theme> {
        self.rx.recv().ok()
    }
}

/// Writes one relay message and flushes it through the pipe.
pub fn write_line<W: Write>(out: &mut W, theme: Theme) -> io::Result<()> {
    writeln!(out, "{theme}")?;
    out.flush()
}

/// Reads relay messages written by [`write_line`] until end of stream.
pub struct LineRelay<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: Read> LineRelay<R> {
    pub fn new(reader: R) -> LineRelay<R> {
        LineRelay {
            lines: BufReader::new(reader).lines(),
        }
    }
}

impl<R: Read> Iterator for LineRelay<R> {
    type Item = Result<Theme, RelayError>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = match self.lines.next()? {
            Ok(line) => line,
            Err(err) => return Some(Err(err.into())),
        };
        Some(line.trim().parse::<Theme>().map_err(RelayError::from))
    }
}
