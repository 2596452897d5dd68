//! Bounded single-producer, single-consumer streams between pipeline stages.
//!
//! A stream is two channels: a bounded data channel, which gives
//! back-pressure on `push`, and a one-slot acknowledgement channel, which
//! a producer can wait on to ask the consumer whether to go on. Dropping or
//! closing either end disconnects both channels and wakes the other side.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error};

use crate::common::{DbError, Result};

enum Item<T> {
    Value(T),
    Failed(DbError),
}

/// Producer end of a stream.
pub struct StreamWriter<T> {
    data: Sender<Item<T>>,
    ack: Receiver<bool>,
}

/// Consumer end of a stream.
pub struct StreamReader<T> {
    data: Receiver<Item<T>>,
    ack: Sender<bool>,
}

/// Creates a stream buffering at most `capacity` items.
pub fn stream<T>(capacity: usize) -> (StreamWriter<T>, StreamReader<T>) {
    let (data_tx, data_rx) = bounded(capacity.max(1));
    let (ack_tx, ack_rx) = bounded(1);
    (
        StreamWriter {
            data: data_tx,
            ack: ack_rx,
        },
        StreamReader {
            data: data_rx,
            ack: ack_tx,
        },
    )
}

impl<T> StreamWriter<T> {
    /// Queues a value, blocking while the buffer is full. Fails with
    /// `StreamClosed` once the reader is gone.
    pub fn push(&self, value: T) -> Result<()> {
        self.data
            .send(Item::Value(value))
            .map_err(|_| DbError::StreamClosed)
    }

    /// Ends the stream with an error the reader sees on its next `pop`.
    pub fn fail(self, err: DbError) {
        // A gone reader has nobody to tell.
        let _ = self.data.send(Item::Failed(err));
    }

    /// Blocks until the consumer answers through
    /// [`StreamReader::signal_continue`]. A closed reader means stop.
    pub fn should_continue(&self) -> bool {
        self.ack.recv().unwrap_or(false)
    }

    pub fn close(self) {}
}

impl<T> StreamReader<T> {
    /// Takes the next value, blocking while the buffer is empty. Returns
    /// `Ok(None)` once the writer closed and the buffer is drained, and the
    /// producer's error if it failed.
    pub fn pop(&self) -> Result<Option<T>> {
        match self.data.recv() {
            Ok(Item::Value(v)) => Ok(Some(v)),
            Ok(Item::Failed(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    /// Answers a producer waiting in [`StreamWriter::should_continue`].
    pub fn signal_continue(&self, go_on: bool) -> Result<()> {
        self.ack.send(go_on).map_err(|_| DbError::StreamClosed)
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drops the reader; a blocked or later `push` fails with `StreamClosed`.
    pub fn close(self) {}

    /// Drains the stream into a vector.
    pub fn collect_all(self) -> Result<Vec<T>> {
        self.collect()
    }
}

impl<T> Iterator for StreamReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        self.pop().transpose()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "producer panicked".to_string()
    }
}

/// Runs `produce` on its own thread, feeding a new stream. An error or
/// panic in `produce` becomes the stream's terminal error. A producer
/// stopped by a closed reader ends quietly.
pub fn spawn_producer<T, F>(capacity: usize, produce: F) -> StreamReader<T>
where
    T: Send + 'static,
    F: FnOnce(&StreamWriter<T>) -> Result<()> + Send + 'static,
{
    let (writer, reader) = stream(capacity);
    thread::spawn(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| produce(&writer)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(DbError::StreamClosed)) => debug!("producer stopped by closed reader"),
            Ok(Err(e)) => writer.fail(e),
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!("stream producer panicked: {}", msg);
                writer.fail(DbError::StreamFailed(msg));
            }
        }
    });
    reader
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_push_pop_close() {
        let (w, r) = stream(4);
        w.push(1).unwrap();
        w.push(2).unwrap();
        w.close();
        assert_eq!(r.pop().unwrap(), Some(1));
        assert_eq!(r.pop().unwrap(), Some(2));
        assert_eq!(r.pop().unwrap(), None);
    }

    #[test]
    fn test_push_blocks_at_capacity() {
        let (w, r) = stream(2);
        let pushed = Arc::new(AtomicUsize::new(0));
        let counter = pushed.clone();
        let handle = thread::spawn(move || {
            for i in 0..3 {
                w.push(i).unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        thread::sleep(Duration::from_millis(100));
        assert_eq!(pushed.load(Ordering::SeqCst), 2);
        assert_eq!(r.len(), 2);

        assert_eq!(r.pop().unwrap(), Some(0));
        handle.join().unwrap();
        assert_eq!(pushed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_closed_reader_fails_push() {
        let (w, r) = stream::<u32>(1);
        w.push(1).unwrap();
        let handle = thread::spawn(move || w.push(2));
        thread::sleep(Duration::from_millis(50));
        r.close();
        assert!(matches!(handle.join().unwrap(), Err(DbError::StreamClosed)));
    }

    #[test]
    fn test_continue_handshake() {
        let (w, r) = stream(1);
        let handle = thread::spawn(move || {
            let mut sent = 0;
            loop {
                w.push(sent).unwrap();
                sent += 1;
                if !w.should_continue() {
                    break;
                }
            }
            sent
        });
        assert_eq!(r.pop().unwrap(), Some(0));
        r.signal_continue(true).unwrap();
        assert_eq!(r.pop().unwrap(), Some(1));
        r.signal_continue(false).unwrap();
        assert_eq!(handle.join().unwrap(), 2);
        assert_eq!(r.pop().unwrap(), None);
    }

    #[test]
    fn test_producer_error_and_panic() {
        let r = spawn_producer(2, |w: &StreamWriter<u32>| {
            w.push(7)?;
            Err(DbError::Overflow)
        });
        assert_eq!(r.pop().unwrap(), Some(7));
        assert!(matches!(r.pop(), Err(DbError::Overflow)));
        assert_eq!(r.pop().unwrap(), None);

        let r = spawn_producer(2, |_: &StreamWriter<u32>| -> Result<()> { panic!("boom") });
        match r.pop() {
            Err(DbError::StreamFailed(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_iterator() {
        let r = spawn_producer(1, |w| {
            for i in 0..5u32 {
                w.push(i)?;
            }
            Ok(())
        });
        assert_eq!(r.collect_all().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
