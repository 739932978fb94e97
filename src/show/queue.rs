use std::{cmp::Ordering, collections::BinaryHeap};

/// What happens when an event comes due
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Start a pass of the cue at this index of the plan
    Cue { index: usize, pass: u32 },
    /// Stop the lighting effect started by a cue
    EffectStop { index: usize },
    /// The show is over
    ShowEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub due_ms: u64,
    /// Insertion counter, breaks ties between events due together
    seq: u64,
    pub kind: EventKind,
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap pops the earliest event first
        other
            .due_ms
            .cmp(&self.due_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending events of the running pass, ordered by due time
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
}

/// Counts of what is still pending
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingEvents {
    pub cues: usize,
    pub effect_stops: usize,
    pub show_end: usize,
}

impl PendingEvents {
    pub fn total(&self) -> usize {
        self.cues + self.effect_stops + self.show_end
    }
}

impl EventQueue {
    pub fn push(&mut self, due_ms: u64, kind: EventKind) {
        self.heap.push(ScheduledEvent {
            due_ms,
            seq: self.next_seq,
            kind,
        });
        self.next_seq += 1;
    }

    /// Pop the earliest event if it is due at `now_ms`
    pub fn pop_due(&mut self, now_ms: u64) -> Option<ScheduledEvent> {
        if self.heap.peek()?.due_ms <= now_ms {
            self.heap.pop()
        } else {
            None
        }
    }

    /// Drop cue and effect events due before `offset_ms`. The show end is
    /// always kept.
    pub fn discard_before(&mut self, offset_ms: u64) -> usize {
        let before = self.heap.len();
        self.heap
            .retain(|e| e.due_ms >= offset_ms || e.kind == EventKind::ShowEnd);
        before - self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn pending(&self) -> PendingEvents {
        let mut pending = PendingEvents::default();
        for event in self.heap.iter() {
            match event.kind {
                EventKind::Cue { .. } => pending.cues += 1,
                EventKind::EffectStop { .. } => pending.effect_stops += 1,
                EventKind::ShowEnd => pending.show_end += 1,
            }
        }
        pending
    }
}
