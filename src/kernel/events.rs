use log::{debug, info};

use super::KernelArgs;
use crate::{
    error::VmResult,
    events::{event_type, keys},
    graphics::PORT_TOP,
    heap::Register,
    pmachine::{PMachine, GLOBAL_QUIT},
};

/// GetEvent(mask, event): fills the event object. Returns whether anything happened.
pub(super) fn get_event(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (mask, object) = (args.u16(0), args.get(1));
    if pm.events.quit_requested() {
        info!("Quit requested");
        pm.set_global(GLOBAL_QUIT, Register::value(1))?;
    }

    let event = pm.events.poll(mask);
    if event.event_type != event_type::NONE {
        debug!("Kernel> GetEvent mask {:x} -> {:?}", mask, event);
    }
    let s = &pm.sel;
    let fields = [
        (s.type_, event.event_type as i16),
        (s.message, event.message as i16),
        (s.modifiers, event.modifiers as i16),
        (s.x, event.x),
        (s.y, event.y),
    ];
    for (selector, value) in fields {
        pm.set_selector_i16(object, selector, value)?;
    }
    Ok(Register::from_bool(event.event_type != event_type::NONE))
}

fn shift_y(pm: &mut PMachine<'_>, object: Register, by: i16) -> VmResult<Register> {
    let y = pm.selector_i16(object, pm.sel.y);
    pm.set_selector_i16(object, pm.sel.y, y.wrapping_add(by))?;
    Ok(pm.registers.acc)
}

pub(super) fn global_to_local(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    shift_y(pm, args.get(0), -PORT_TOP)
}

pub(super) fn local_to_global(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    shift_y(pm, args.get(0), PORT_TOP)
}

/// Direction number for a cursor key, clockwise from up with 0 for the keypad centre
fn direction_for_key(key: u16) -> Option<u16> {
    let direction = match key {
        keys::UP => 1,
        keys::PAGE_UP => 2,
        keys::RIGHT => 3,
        keys::PAGE_DOWN => 4,
        keys::DOWN => 5,
        keys::END => 6,
        keys::LEFT => 7,
        keys::HOME => 8,
        keys::CENTER => 0,
        _ => return None,
    };
    Some(direction)
}

/// MapKeyToDir(event): turns cursor key events into direction events
pub(super) fn map_key_to_dir(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let object = args.get(0);
    let event_type = pm.selector_i16(object, pm.sel.type_) as u16;
    if event_type & event_type::KEYBOARD == 0 {
        return Ok(object);
    }
    let message = pm.selector_i16(object, pm.sel.message) as u16;
    if let Some(direction) = direction_for_key(message) {
        debug!("Kernel> MapKeyToDir {:x} -> {}", message, direction);
        pm.set_selector_i16(object, pm.sel.type_, event_type::DIRECTION as i16)?;
        pm.set_selector_i16(object, pm.sel.message, direction as i16)?;
    }
    Ok(object)
}

pub(super) fn have_mouse(pm: &mut PMachine<'_>, _args: &KernelArgs) -> VmResult<Register> {
    Ok(Register::from_bool(pm.events.has_mouse()))
}
