//! Control command queue between the control thread and the audio callback

use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};

/// Transport commands drained by the audio callback at buffer boundaries,
/// so they land on a sample boundary without locking inside the hot loop.
#[derive(Debug, Clone, Copy)]
pub enum ControlCommand {
    /// Resume playback from the current position
    Resume,
    /// Jump to an absolute frame (applied by the audio thread)
    Seek(u64),
}

/// Thread-safe SPSC queue on a lock-free ring buffer.
///
/// The producer side is used by control handles; the consumer side is
/// drained once per audio callback.
pub struct CommandQueue {
    producer: Mutex<ringbuf::HeapProd<ControlCommand>>,
    consumer: Mutex<ringbuf::HeapCons<ControlCommand>>,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        let rb = HeapRb::new(capacity);
        let (producer, consumer) = rb.split();
        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
        }
    }

    /// Push a command; returns false if the queue is full
    pub fn push(&self, command: ControlCommand) -> bool {
        self.producer.lock().try_push(command).is_ok()
    }

    /// Pop one command (called from the audio thread)
    pub fn pop(&self) -> Option<ControlCommand> {
        self.consumer.lock().try_pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_round_trip_in_order() {
        let queue = CommandQueue::new(8);
        assert!(queue.push(ControlCommand::Resume));
        assert!(queue.push(ControlCommand::Seek(1234)));
        assert!(matches!(queue.pop(), Some(ControlCommand::Resume)));
        assert!(matches!(queue.pop(), Some(ControlCommand::Seek(1234))));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn full_queue_rejects_pushes() {
        let queue = CommandQueue::new(2);
        assert!(queue.push(ControlCommand::Resume));
        assert!(queue.push(ControlCommand::Resume));
        assert!(!queue.push(ControlCommand::Resume));
    }
}
