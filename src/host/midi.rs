/// Note events exchanged with the hosted plugin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MidiMessage {
    NoteOn {
        channel: u8,
        note: u8,
        velocity: f32,
    },
    NoteOff {
        channel: u8,
        note: u8,
        velocity: f32,
    },
    PolyPressure {
        channel: u8,
        note: u8,
        pressure: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiEvent {
    pub sample_offset: u32,
    pub message: MidiMessage,
}

/// Fixed-capacity event list for one block. Pushing past capacity drops the
/// event instead of allocating on the audio thread.
#[derive(Debug, Clone)]
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
    limit: usize,
}

impl MidiBuffer {
    pub const DEFAULT_CAPACITY: usize = 512;

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            limit: capacity,
        }
    }

    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.events.len() >= self.limit {
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MidiEvent> {
        self.events.iter()
    }
}

impl Default for MidiBuffer {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

/// Transport snapshot handed to the hosted plugin for one block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayHead {
    pub sample_rate: f64,
    pub playing: bool,
    pub tempo: Option<f64>,
    pub time_signature: Option<(i32, i32)>,
    pub position_samples: Option<i64>,
    pub position_beats: Option<f64>,
    pub bar_start_beats: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on(offset: u32) -> MidiEvent {
        MidiEvent {
            sample_offset: offset,
            message: MidiMessage::NoteOn {
                channel: 0,
                note: 60,
                velocity: 0.8,
            },
        }
    }

    #[test]
    fn push_stops_at_capacity() {
        let mut buffer = MidiBuffer::with_capacity(2);
        assert!(buffer.push(note_on(0)));
        assert!(buffer.push(note_on(1)));
        assert!(!buffer.push(note_on(2)));
        assert_eq!(buffer.len(), 2);

        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.push(note_on(3)));
    }
}
