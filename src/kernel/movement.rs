use log::{debug, info};

use super::KernelArgs;
use crate::{
    animate::{signal, RectSelectors},
    config::SciVersion,
    error::VmResult,
    graphics::Rect,
    heap::Register,
    pmachine::{AbortRequest, PMachine},
};

/// Loop an actor faces for a heading in degrees
fn loop_for_angle(angle: i16) -> i16 {
    match angle {
        a if a < 45 => 3,
        a if a < 136 => 0,
        a if a < 225 => 2,
        a if a < 316 => 1,
        _ => 3,
    }
}

pub(super) fn dir_loop(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (object, angle) = (args.get(0), args.i16(1));
    let signal = pm.selector_i16(object, pm.sel.signal) as u16;
    if signal & signal::DOESNT_TURN != 0 {
        return Ok(pm.registers.acc);
    }
    let new_loop = loop_for_angle(angle);
    let view_no = pm.selector_i16(object, pm.sel.view) as u16;
    let loop_count = pm
        .views
        .get(pm.resources, view_no, pm.config.version.vga_views())?
        .loop_count();
    // views without up and down loops keep their sideways loop
    if new_loop > 1 && loop_count < 4 {
        return Ok(pm.registers.acc);
    }
    debug!("Kernel> DirLoop {} angle {} -> loop {}", pm.heap.object_name(object), angle, new_loop);
    pm.set_selector_i16(object, pm.sel.loop_, new_loop)?;
    Ok(pm.registers.acc)
}

impl<'a> PMachine<'a> {
    fn collision_rect(&self, object: Register) -> Rect {
        if self.config.version >= SciVersion::Sci11 {
            self.read_rect(object, RectSelectors::NowSeen)
        } else {
            self.read_rect(object, RectSelectors::Base)
        }
    }

    /// False if the actor sits on an illegal control colour, or (unless it ignores
    /// actors) overlaps a member of `others`
    pub(crate) fn can_be_here(&self, object: Register, others: Register) -> VmResult<bool> {
        let rect = self.collision_rect(object);
        let illegal_bits = self.selector_i16(object, self.sel.illegal_bits) as u16;
        if self.screen.control_mask(rect.port_to_screen()) & illegal_bits != 0 {
            return Ok(false);
        }

        let signal = self.selector_i16(object, self.sel.signal) as u16;
        if others.is_null() || signal & signal::IGNORE_ACTOR != 0 {
            return Ok(true);
        }
        for node in self.heap.list_nodes(others)? {
            let other = self.heap.node(node)?.value;
            if other == object {
                continue;
            }
            let other_signal = self.selector_i16(other, self.sel.signal) as u16;
            if other_signal & (signal::IGNORE_ACTOR | signal::REMOVE_VIEW | signal::NO_UPDATE) != 0 {
                continue;
            }
            if rect.intersects(&self.collision_rect(other)) {
                debug!(
                    "{} blocked by {}",
                    self.heap.object_name(object),
                    self.heap.object_name(other)
                );
                return Ok(false);
            }
        }
        Ok(true)
    }
}

pub(super) fn can_be_here(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let result = pm.can_be_here(args.get(0), args.get(1))?;
    debug!("Kernel> CanBeHere {} = {}", pm.heap.object_name(args.get(0)), result);
    Ok(Register::from_bool(result))
}

pub(super) fn cant_be_here(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let result = pm.can_be_here(args.get(0), args.get(1))?;
    Ok(Register::from_bool(!result))
}

/// InitBresen(mover [, step_factor]): sets up a line from the client's position to the mover's target
pub(super) fn init_bresen(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let mover = args.get(0);
    let step_factor = args.opt(1).map_or(1, |r| r.to_i16());
    let s = pm.sel.clone();
    let client = pm.heap.read_selector(mover, s.client)?;
    info!("Kernel> InitBresen {} by {}", pm.heap.object_name(mover), step_factor);

    // 16-bit values, worked in 32 bits and truncated on the way back to the object
    let mover_x = pm.selector_i16(mover, s.x);
    let mover_y = pm.selector_i16(mover, s.y);
    let client_x = pm.selector_i16(client, s.x);
    let client_y = pm.selector_i16(client, s.y);
    let x_step = pm.selector_i16(client, s.x_step) as i32 * step_factor as i32;
    let y_step = pm.selector_i16(client, s.y_step) as i32 * step_factor as i32;

    let dx = mover_x.wrapping_sub(client_x) as i32;
    let dy = mover_y.wrapping_sub(client_y) as i32;
    let x_axis = dx.abs() > dy.abs();
    let (mut step_dx, mut step_dy) = match x_axis {
        true => (x_step, (x_step * dy).checked_div(dx).unwrap_or(0)),
        false => ((y_step * dx).checked_div(dy).unwrap_or(0), y_step),
    };
    step_dx = step_dx.abs();
    step_dy = step_dy.abs();
    if dx < 0 {
        step_dx = -step_dx;
    }
    if dy < 0 {
        step_dy = -step_dy;
    }

    // Octants go counter clockwise starting with a line up and to the right with major x-axis
    let octant = match (x_axis, dx >= 0, dy >= 0) {
        (true, true, false) => 1,
        (false, true, false) => 2,
        (false, false, false) => 3,
        (true, false, false) => 4,
        (true, false, true) => 5,
        (false, false, true) => 6,
        (false, true, true) => 7,
        (true, true, true) => 8,
    };

    // i1 is added when di >= 0 (rounded up to next pixel)
    let i1 = match octant {
        1 | 3 | 5 | 7 => 2 * (step_dy * dx - step_dx * dy),
        _ => 2 * (step_dx * dy - step_dy * dx),
    };
    // i2 is added when di < 0 (rounded down to current pixel)
    // di is set to the initial value
    let (i2, di) = match octant {
        1 | 8 => (-2 * dx, i1 - dx),
        2 | 3 => (2 * dy, i1 + dy),
        4 | 5 => (2 * dx, i1 + dx),
        _ => (-2 * dy, i1 - dy),
    };
    // Direction of the minor axis
    let minor_axis_incr = match octant {
        2 | 5 | 7 | 8 => 1,
        _ => -1,
    };
    debug!(
        "Bresen octant {} step ({}, {}) i1 {} i2 {} di {}",
        octant, step_dx, step_dy, i1, i2, di
    );

    pm.set_selector_i16(mover, s.dx, step_dx as i16)?;
    pm.set_selector_i16(mover, s.dy, step_dy as i16)?;
    pm.set_selector_i16(mover, s.b_i1, i1 as i16)?;
    pm.set_selector_i16(mover, s.b_i2, i2 as i16)?;
    pm.set_selector_i16(mover, s.b_di, di as i16)?;
    pm.set_selector_i16(mover, s.b_x_axis, x_axis as i16)?;
    pm.set_selector_i16(mover, s.b_incr, minor_axis_incr)?;
    pm.set_selector_i16(mover, s.b_move_cnt, 0)?;
    Ok(pm.registers.acc)
}

/// DoBresen(mover): moves the client one step along the line. Returns whether the move is over.
pub(super) fn do_bresen(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let mover = args.get(0);
    let s = pm.sel.clone();
    let client = pm.heap.read_selector(mover, s.client)?;
    let tracks_obstacles = pm.config.version.tracks_obstacles();
    pm.kernel_roots.extend([mover, client]);

    let read = |object, selector| pm.selector_i16(object, selector) as i32;
    let (mover_x, mover_y) = (read(mover, s.x), read(mover, s.y));
    let old_x = pm.selector_i16(client, s.x);
    let old_y = pm.selector_i16(client, s.y);
    let (dx, dy) = (read(mover, s.dx), read(mover, s.dy));
    let (i1, i2) = (read(mover, s.b_i1), read(mover, s.b_i2));
    let mut di = read(mover, s.b_di);
    let x_axis = read(mover, s.b_x_axis) != 0;
    let minor_axis_incr = read(mover, s.b_incr);

    let (mut x, mut y) = (old_x as i32, old_y as i32);
    let mut completed = false;
    if (x_axis && (mover_x - x).abs() <= dx.abs()) || (!x_axis && (mover_y - y).abs() <= dy.abs()) {
        // Reached destination
        x = mover_x;
        y = mover_y;
        completed = true;
    } else {
        // Move forward one step
        x += dx;
        y += dy;
        if di < 0 {
            di += i1;
        } else {
            di += i2;
            if x_axis {
                y += minor_axis_incr;
            } else {
                x += minor_axis_incr;
            }
        }
    }
    debug!("Kernel> DoBresen {} ({}, {}) -> ({}, {})", pm.heap.object_name(client), old_x, old_y, x, y);
    pm.set_selector_i16(client, s.x, x as i16)?;
    pm.set_selector_i16(client, s.y, y as i16)?;

    if tracks_obstacles {
        let signal = pm.selector_i16(client, s.signal) as u16 & !signal::HIT_OBSTACLE;
        pm.set_selector_i16(client, s.signal, signal as i16)?;
        pm.set_selector_i16(mover, s.x_last, old_x)?;
        pm.set_selector_i16(mover, s.y_last, old_y)?;
    }

    let blocked = if tracks_obstacles {
        pm.invoke_if_present(client, s.cant_be_here, &[])?
            .is_some_and(|r| !r.is_zero_or_null())
    } else {
        pm.invoke_if_present(client, s.can_be_here, &[])?
            .is_some_and(|r| r.is_zero_or_null())
    };
    if pm.abort != AbortRequest::None {
        return Ok(pm.registers.acc);
    }

    if blocked {
        debug!("{} cannot move there", pm.heap.object_name(client));
        pm.set_selector_i16(client, s.x, old_x)?;
        pm.set_selector_i16(client, s.y, old_y)?;
        if tracks_obstacles {
            let signal = pm.selector_i16(client, s.signal) as u16 | signal::HIT_OBSTACLE;
            pm.set_selector_i16(client, s.signal, signal as i16)?;
        }
        completed = true;
    } else {
        pm.set_selector_i16(mover, s.b_di, di as i16)?;
    }

    if completed {
        pm.set_selector_i16(mover, s.completed, 1)?;
        if tracks_obstacles {
            pm.invoke_if_present(mover, s.move_done, &[])?;
        }
    }
    Ok(Register::from_bool(completed))
}
