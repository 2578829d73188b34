use std::ffi::c_void;

use vst3::Interface;
use vst3::Steinberg::FUnknown;
use vst3::Steinberg::Vst::IEventList;

use super::c_api::*;
use crate::host::midi::{MidiBuffer, MidiEvent, MidiMessage};

/// Pre-allocated `IEventList`, used for both directions of a `process` call.
#[repr(C)]
pub struct EventList {
    vtbl: *const IEventListVtbl,
    events: Vec<Event>,
    limit: usize,
}

impl EventList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            vtbl: &EVENT_LIST_VTBL,
            events: Vec::with_capacity(capacity),
            limit: capacity,
        }
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

    pub fn push(&mut self, event: Event) -> bool {
        if self.events.len() >= self.limit {
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn as_ptr(&mut self) -> *mut c_void {
        self as *mut Self as *mut c_void
    }

    /// Replaces the contents with the note events of `midi`.
    pub fn fill_from(&mut self, midi: &MidiBuffer) {
        self.clear();
        for event in midi.iter() {
            if !self.push(to_vst_event(event)) {
                break;
            }
        }
    }

    /// Appends every event the plugin produced that has a MIDI equivalent.
    pub fn drain_into(&mut self, midi: &mut MidiBuffer) {
        for event in self.events.drain(..) {
            if let Some(event) = from_vst_event(&event) {
                midi.push(event);
            }
        }
    }
}

pub fn to_vst_event(event: &MidiEvent) -> Event {
    let (type_, payload) = match event.message {
        MidiMessage::NoteOn {
            channel,
            note,
            velocity,
        } => (
            K_NOTE_ON_EVENT,
            EventPayload {
                note_on: NoteOnEvent {
                    channel: channel as i16,
                    pitch: note as i16,
                    velocity,
                    note_id: -1,
                    ..Default::default()
                },
            },
        ),
        MidiMessage::NoteOff {
            channel,
            note,
            velocity,
        } => (
            K_NOTE_OFF_EVENT,
            EventPayload {
                note_off: NoteOffEvent {
                    channel: channel as i16,
                    pitch: note as i16,
                    velocity,
                    note_id: -1,
                    ..Default::default()
                },
            },
        ),
        MidiMessage::PolyPressure {
            channel,
            note,
            pressure,
        } => (
            K_POLY_PRESSURE_EVENT,
            EventPayload {
                poly_pressure: PolyPressureEvent {
                    channel: channel as i16,
                    pitch: note as i16,
                    pressure,
                    note_id: -1,
                },
            },
        ),
    };
    Event {
        bus_index: 0,
        sample_offset: event.sample_offset as i32,
        ppq_position: 0.0,
        flags: 0,
        type_,
        payload,
    }
}

pub fn from_vst_event(event: &Event) -> Option<MidiEvent> {
    let sample_offset = event.sample_offset.max(0) as u32;
    // Reading a union field is only sound for the variant `type_` names.
    let message = unsafe {
        match event.type_ {
            K_NOTE_ON_EVENT => {
                let e = event.payload.note_on;
                MidiMessage::NoteOn {
                    channel: e.channel.clamp(0, 15) as u8,
                    note: e.pitch.clamp(0, 127) as u8,
                    velocity: e.velocity,
                }
            }
            K_NOTE_OFF_EVENT => {
                let e = event.payload.note_off;
                MidiMessage::NoteOff {
                    channel: e.channel.clamp(0, 15) as u8,
                    note: e.pitch.clamp(0, 127) as u8,
                    velocity: e.velocity,
                }
            }
            K_POLY_PRESSURE_EVENT => {
                let e = event.payload.poly_pressure;
                MidiMessage::PolyPressure {
                    channel: e.channel.clamp(0, 15) as u8,
                    note: e.pitch.clamp(0, 127) as u8,
                    pressure: e.pressure,
                }
            }
            _ => return None,
        }
    };
    Some(MidiEvent {
        sample_offset,
        message,
    })
}

unsafe fn list<'a>(this: *mut c_void) -> &'a mut EventList {
    &mut *(this as *mut EventList)
}

unsafe extern "system" fn events_query_interface(
    this: *mut c_void,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> TResult {
    if obj.is_null() || iid.is_null() {
        return K_INVALID_ARGUMENT;
    }
    if *iid == FUnknown::IID || *iid == IEventList::IID {
        *obj = this;
        return K_RESULT_OK;
    }
    *obj = std::ptr::null_mut();
    K_NO_INTERFACE
}

unsafe extern "system" fn events_add_ref(_this: *mut c_void) -> u32 {
    1
}

unsafe extern "system" fn events_release(_this: *mut c_void) -> u32 {
    1
}

unsafe extern "system" fn events_get_event_count(this: *mut c_void) -> i32 {
    list(this).events.len() as i32
}

unsafe extern "system" fn events_get_event(this: *mut c_void, index: i32, event: *mut Event) -> TResult {
    let list = list(this);
    if event.is_null() || index < 0 {
        return K_INVALID_ARGUMENT;
    }
    match list.events.get(index as usize) {
        Some(e) => {
            *event = *e;
            K_RESULT_OK
        }
        None => K_INVALID_ARGUMENT,
    }
}

unsafe extern "system" fn events_add_event(this: *mut c_void, event: *mut Event) -> TResult {
    if event.is_null() {
        return K_INVALID_ARGUMENT;
    }
    if list(this).push(*event) {
        K_RESULT_OK
    } else {
        K_RESULT_FALSE
    }
}

static EVENT_LIST_VTBL: IEventListVtbl = IEventListVtbl {
    base: FUnknownVtbl {
        query_interface: events_query_interface,
        add_ref: events_add_ref,
        release: events_release,
    },
    get_event_count: events_get_event_count,
    get_event: events_get_event,
    add_event: events_add_event,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_keeps_channel_pitch_and_offset() {
        let midi = MidiEvent {
            sample_offset: 17,
            message: MidiMessage::NoteOn {
                channel: 3,
                note: 60,
                velocity: 0.5,
            },
        };
        let vst = to_vst_event(&midi);
        assert_eq!(vst.type_, K_NOTE_ON_EVENT);
        assert_eq!(vst.sample_offset, 17);
        assert_eq!(from_vst_event(&vst), Some(midi));
    }

    #[test]
    fn unknown_event_types_are_skipped() {
        let mut vst = to_vst_event(&MidiEvent {
            sample_offset: 0,
            message: MidiMessage::NoteOff {
                channel: 0,
                note: 1,
                velocity: 0.0,
            },
        });
        vst.type_ = 2; // data event
        assert_eq!(from_vst_event(&vst), None);
    }

    #[test]
    fn plugin_output_is_collected_through_the_vtable() {
        let mut output = EventList::with_capacity(1);
        let mut event = to_vst_event(&MidiEvent {
            sample_offset: 4,
            message: MidiMessage::PolyPressure {
                channel: 1,
                note: 64,
                pressure: 0.25,
            },
        });
        unsafe {
            let ptr = output.as_ptr();
            let v = get_vtbl::<IEventListVtbl>(ptr);
            assert_eq!((v.add_event)(ptr, &mut event), K_RESULT_OK);
            assert_eq!((v.add_event)(ptr, &mut event), K_RESULT_FALSE);
            assert_eq!((v.get_event_count)(ptr), 1);
        }

        let mut midi = MidiBuffer::with_capacity(4);
        output.drain_into(&mut midi);
        assert!(output.is_empty());
        assert_eq!(midi.len(), 1);
    }
}
