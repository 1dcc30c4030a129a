use std::collections::VecDeque;

use log::debug;

/// Event type bits, as scripts see them in an event's `type`
pub mod event_type {
    pub const NONE: u16 = 0x0000;
    pub const MOUSE_DOWN: u16 = 0x0001;
    pub const MOUSE_UP: u16 = 0x0002;
    pub const KEYBOARD: u16 = 0x0004;
    pub const DIRECTION: u16 = 0x0040;
    pub const SAID: u16 = 0x0080;
    pub const ANY: u16 = 0x7fff;
}

/// PC scan codes for the keys scripts treat as directions
pub mod keys {
    pub const HOME: u16 = 0x4700;
    pub const UP: u16 = 0x4800;
    pub const PAGE_UP: u16 = 0x4900;
    pub const LEFT: u16 = 0x4b00;
    pub const CENTER: u16 = 0x4c00;
    pub const RIGHT: u16 = 0x4d00;
    pub const END: u16 = 0x4f00;
    pub const DOWN: u16 = 0x5000;
    pub const PAGE_DOWN: u16 = 0x5100;
    pub const ESCAPE: u16 = 0x1b;
    pub const ENTER: u16 = 0x0d;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SciEvent {
    pub event_type: u16,
    pub message: u16,
    pub modifiers: u16,
    pub x: i16,
    pub y: i16,
}

impl SciEvent {
    pub fn key(message: u16) -> Self {
        Self {
            event_type: event_type::KEYBOARD,
            message,
            ..Default::default()
        }
    }

    pub fn mouse_down(x: i16, y: i16) -> Self {
        Self {
            event_type: event_type::MOUSE_DOWN,
            x,
            y,
            ..Default::default()
        }
    }
}

pub trait EventSource {
    /// The oldest pending event matching `mask`, or a NONE event
    fn poll(&mut self, mask: u16) -> SciEvent;

    fn quit_requested(&self) -> bool;

    fn has_mouse(&self) -> bool {
        false
    }
}

/// Replays a fixed queue of events. Used headless and in tests.
#[derive(Default, Debug)]
pub struct ScriptedEvents {
    queue: VecDeque<SciEvent>,
    quit: bool,
    mouse: bool,
}

impl ScriptedEvents {
    pub fn new(events: impl IntoIterator<Item = SciEvent>) -> Self {
        Self {
            queue: events.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn with_mouse(mut self) -> Self {
        self.mouse = true;
        self
    }

    pub fn push(&mut self, event: SciEvent) {
        self.queue.push_back(event);
    }

    pub fn request_quit(&mut self) {
        self.quit = true;
    }
}

impl EventSource for ScriptedEvents {
    fn poll(&mut self, mask: u16) -> SciEvent {
        match self.queue.iter().position(|e| e.event_type & mask != 0) {
            Some(index) => {
                let event = self.queue.remove(index).unwrap_or_default();
                debug!("Event {event:?}");
                event
            }
            None => SciEvent::default(),
        }
    }

    fn quit_requested(&self) -> bool {
        self.quit
    }

    fn has_mouse(&self) -> bool {
        self.mouse
    }
}
