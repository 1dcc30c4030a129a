use log::{debug, info, warn};

use super::KernelArgs;
use crate::{
    animate::{AnimateEntry, RectSelectors},
    config::SciVersion,
    error::{VmError, VmResult},
    graphics::{bresenham, PriorityBands, Rect, MASK_CONTROL, MASK_PRIORITY, MASK_VISUAL, PORT_HEIGHT, PORT_TOP, WHITE},
    heap::Register,
    picture::draw_picture,
    pmachine::PMachine,
    resource::ResourceType,
};

pub(super) fn draw_pic(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let number = args.u16(0);
    // the "clear" argument flipped its meaning after SCI01
    let clear = match args.opt(2) {
        None => true,
        Some(flag) if pm.config.version <= SciVersion::Sci01 => !flag.is_null(),
        Some(flag) => flag.is_null(),
    };
    info!("Kernel> DrawPic {} (clear: {})", number, clear);
    let resource = pm
        .resources
        .find_resource(ResourceType::Pic, number)
        .ok_or(VmError::ResourceMissing(ResourceType::Pic, number))?;
    draw_picture(&mut pm.screen, resource, clear);
    pm.animate.dispose_last_cast();
    pm.pic_number = number;
    pm.pic_not_valid = 1;
    Ok(pm.registers.acc)
}

pub(super) fn show(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    info!("Kernel> Show {}", args.u16(0));
    pm.animate_show_pic();
    Ok(pm.registers.acc)
}

pub(super) fn pic_not_valid(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let old = pm.pic_not_valid;
    if let Some(value) = args.opt(0) {
        pm.pic_not_valid = value.to_i16();
    }
    debug!("Kernel> PicNotValid {} -> {}", old, pm.pic_not_valid);
    Ok(Register::value(old))
}

pub(super) fn animate(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let cast = args.get(0);
    let cycle = args.opt(1).is_some_and(|c| !c.is_null());
    debug!("Kernel> Animate {} cycle: {}", cast, cycle);
    pm.kernel_animate(cast, cycle, args.as_slice())?;
    Ok(pm.registers.acc)
}

fn object_cel(pm: &PMachine<'_>, object: Register) -> VmResult<(u16, usize, usize)> {
    let view_no = pm.selector_i16(object, pm.sel.view) as u16;
    let view = pm.views.get(pm.resources, view_no, pm.config.version.vga_views())?;
    let loop_no = (pm.selector_i16(object, pm.sel.loop_).max(0) as usize).min(view.loop_count().saturating_sub(1));
    let cel_no = (pm.selector_i16(object, pm.sel.cel).max(0) as usize).min(view.cel_count(loop_no).saturating_sub(1));
    Ok((view_no, loop_no, cel_no))
}

pub(super) fn set_now_seen(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let object = args.get(0);
    let rect = {
        let (view_no, loop_no, cel_no) = object_cel(pm, object)?;
        let view = pm.views.get(pm.resources, view_no, pm.config.version.vga_views())?;
        let (x, y, z) = (
            pm.selector_i16(object, pm.sel.x),
            pm.selector_i16(object, pm.sel.y),
            pm.selector_i16(object, pm.sel.z),
        );
        view.cel_rect(loop_no, cel_no, x, y, z)?
    };
    debug!("Kernel> SetNowSeen {} {:?}", pm.heap.object_name(object), rect);
    pm.write_rect(object, rect, RectSelectors::NowSeen)?;
    Ok(pm.registers.acc)
}

pub(super) fn num_loops(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let view_no = pm.selector_i16(args.get(0), pm.sel.view) as u16;
    let view = pm.views.get(pm.resources, view_no, pm.config.version.vga_views())?;
    Ok(Register::value(view.loop_count() as i16))
}

pub(super) fn num_cels(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let object = args.get(0);
    let view_no = pm.selector_i16(object, pm.sel.view) as u16;
    let loop_no = pm.selector_i16(object, pm.sel.loop_).max(0) as usize;
    let view = pm.views.get(pm.resources, view_no, pm.config.version.vga_views())?;
    Ok(Register::value(view.cel_count(loop_no) as i16))
}

fn cel_size(pm: &PMachine<'_>, args: &KernelArgs) -> VmResult<(u16, u16)> {
    let view = pm.views.get(pm.resources, args.u16(0), pm.config.version.vga_views())?;
    let loop_no = (args.i16(1).max(0) as usize).min(view.loop_count().saturating_sub(1));
    let cel_no = (args.i16(2).max(0) as usize).min(view.cel_count(loop_no).saturating_sub(1));
    Ok(view.cel(loop_no, cel_no).map_or((0, 0), |c| (c.width, c.height)))
}

pub(super) fn cel_wide(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    Ok(Register::value(cel_size(pm, args)?.0 as i16))
}

pub(super) fn cel_high(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    Ok(Register::value(cel_size(pm, args)?.1 as i16))
}

/// DrawCel(view, loop, cel, left, top, priority): draws a cel with its top left corner at (left, top)
pub(super) fn draw_cel(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (view_no, loop_no, cel_no) = (args.u16(0), args.i16(1).max(0) as usize, args.i16(2).max(0) as usize);
    let (left, top) = (args.i16(3), args.i16(4));
    let priority = match args.opt(5).map(|p| p.to_i16()) {
        Some(p) if p >= 0 => p.min(15) as u8,
        _ => pm.bands.coordinate_to_priority(top),
    };
    info!("Kernel> DrawCel {}.{}.{} at {},{}", view_no, loop_no, cel_no, left, top);

    let view = pm.views.get(pm.resources, view_no, pm.config.version.vga_views())?;
    let Some(cel) = view.cel(loop_no, cel_no) else {
        warn!("View {view_no} has no cel {loop_no}.{cel_no}");
        return Ok(pm.registers.acc);
    };
    let rect = Rect::saturating(
        left as i32,
        top as i32,
        left as i32 + cel.width as i32,
        top as i32 + cel.height as i32,
    );
    view.draw(
        &mut pm.screen,
        loop_no,
        cel_no,
        rect.port_to_screen(),
        Rect::port().port_to_screen(),
        priority,
    )?;
    pm.show_bits(rect);
    Ok(pm.registers.acc)
}

/// AddToPic(list), or AddToPic(view, loop, cel, x, y, priority, control) for a single cel
pub(super) fn add_to_pic(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    if args.len() <= 1 {
        let cast = args.get(0);
        info!("Kernel> AddToPic list {}", cast);
        if !cast.is_null() {
            pm.add_to_pic(cast)?;
        }
        return Ok(pm.registers.acc);
    }

    let entry = AnimateEntry::for_view(args.u16(0), args.i16(1), args.i16(2), args.i16(3), args.i16(4), args.i16(5));
    let control = match args.i16(6) {
        c if c < 0 => None,
        c => Some(c.min(15) as u8),
    };
    info!("Kernel> AddToPic view {} at {},{}", entry.view, entry.x, entry.y);
    pm.add_view_to_pic(entry, control)?;
    Ok(pm.registers.acc)
}

/// OnControl([map,] x, y [, right, bottom]): which values of a plane lie under a point or rect
pub(super) fn on_control(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (plane, base) = match args.len() {
        2 | 4 => (MASK_CONTROL, 0),
        _ => (args.u16(0) as u8, 1),
    };
    let (x, y) = (args.i16(base), args.i16(base + 1));
    let rect = if args.len() > base + 2 {
        Rect::new(x, y, args.i16(base + 2), args.i16(base + 3))
    } else {
        Rect::new(x, y, x + 1, y + 1)
    };
    let mask = pm.screen.plane_mask(rect.port_to_screen(), plane);
    debug!("Kernel> OnControl {:?} plane {} = {:04x}", rect, plane, mask);
    Ok(Register::new(0, mask))
}

pub(super) fn coord_pri(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    Ok(Register::value(pm.bands.coordinate_to_priority(args.i16(0)) as i16))
}

pub(super) fn pri_coord(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let priority = args.i16(0).clamp(0, 15) as u8;
    Ok(Register::value(pm.bands.priority_to_coordinate(priority)))
}

pub(super) fn base_setter(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let object = args.get(0);
    let (width, height) = {
        let (view_no, loop_no, cel_no) = object_cel(pm, object)?;
        let view = pm.views.get(pm.resources, view_no, pm.config.version.vga_views())?;
        view.cel(loop_no, cel_no).map_or((0, 0), |c| (c.width as i16, c.height as i16))
    };
    let (x, y, z) = (
        pm.selector_i16(object, pm.sel.x),
        pm.selector_i16(object, pm.sel.y),
        pm.selector_i16(object, pm.sel.z),
    );
    let (x, y, z, width, height) = (x as i32, y as i32, z as i32, width as i32, height as i32);
    let rect = Rect::saturating(x - width / 2, y - height + 1 - z, x + width / 2, y + 1 - z);
    debug!("Kernel> BaseSetter {} {:?}", pm.heap.object_name(object), rect);
    pm.write_rect(object, rect, RectSelectors::Base)?;
    Ok(pm.registers.acc)
}

mod graph_op {
    pub const GET_COLOURS_NR: u16 = 2;
    pub const DRAW_LINE: u16 = 4;
    pub const SAVE_BOX: u16 = 7;
    pub const RESTORE_BOX: u16 = 8;
    pub const FILL_BOX_BACKGROUND: u16 = 9;
    pub const FILL_BOX_FOREGROUND: u16 = 10;
    pub const FILL_BOX_ANY: u16 = 11;
    pub const UPDATE_BOX: u16 = 12;
    pub const REDRAW_BOX: u16 = 13;
    pub const ADJUST_PRIORITY: u16 = 14;
}

/// Graph(op, ...). Boxes are given as top, left, bottom, right in port coordinates.
pub(super) fn graph(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let op = args.u16(0);
    let rect = Rect::new(args.i16(2), args.i16(1), args.i16(4), args.i16(3));
    debug!("Kernel> Graph {} {:?}", op, args.rest(1));
    match op {
        graph_op::GET_COLOURS_NR => {
            let colours = if pm.config.version.vga_views() { 256 } else { 16 };
            return Ok(Register::value(colours));
        }
        graph_op::DRAW_LINE => {
            let (colour, priority, control) = (args.i16(5), args.i16(6), args.i16(7));
            let mut mask = 0;
            if colour != -1 {
                mask |= MASK_VISUAL;
            }
            if priority != -1 {
                mask |= MASK_PRIORITY;
            }
            if control != -1 {
                mask |= MASK_CONTROL;
            }
            let screen = &mut pm.screen;
            // Graph(4, y1, x1, y2, x2, colour, priority, control)
            let (start, end) = ((rect.left as i32, rect.top as i32), (rect.right as i32, rect.bottom as i32));
            bresenham(start, end, &mut |x, y| {
                let (x, y) = (x as i16, y as i16);
                if Rect::port().contains(x, y) {
                    screen.put_pixel(x, y + PORT_TOP, mask, colour as u8, priority as u8, control as u8);
                }
            });
        }
        graph_op::SAVE_BOX => {
            let mask = args.opt(5).map_or(MASK_VISUAL | MASK_PRIORITY | MASK_CONTROL, |m| m.to_u16() as u8);
            return Ok(pm.save_bits(rect, mask));
        }
        graph_op::RESTORE_BOX => pm.restore_bits(args.get(1)),
        graph_op::FILL_BOX_BACKGROUND => {
            pm.screen.fill_rect(rect.clip(&Rect::port()).port_to_screen(), MASK_VISUAL, WHITE, 0, 0);
        }
        graph_op::FILL_BOX_FOREGROUND => {
            pm.screen.fill_rect(rect.clip(&Rect::port()).port_to_screen(), MASK_VISUAL, 0, 0, 0);
        }
        graph_op::FILL_BOX_ANY => {
            let (mask, colour, priority, control) = (args.u16(5) as u8, args.u16(6), args.u16(7), args.u16(8));
            pm.screen.fill_rect(
                rect.clip(&Rect::port()).port_to_screen(),
                mask,
                colour as u8,
                priority as u8,
                control as u8,
            );
        }
        graph_op::UPDATE_BOX => pm.show_bits(rect),
        graph_op::REDRAW_BOX => pm.re_animate(rect)?,
        graph_op::ADJUST_PRIORITY => {
            let (top, bottom) = (args.i16(1), args.i16(2));
            info!("Priority bands now span {}..{}", top, bottom);
            pm.bands = PriorityBands::new(14, top, bottom.min(PORT_HEIGHT));
        }
        _ => warn!("Graph subfunction {op} is not supported"),
    }
    Ok(pm.registers.acc)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use crate::{
        config::{EngineConfig, SciVersion},
        events::ScriptedEvents,
        graphics::NullDisplay,
        heap::{tests::class_resources, Register},
        pmachine::PMachine,
        resource::ResourceManager,
    };

    fn machine(resources: &ResourceManager, version: SciVersion) -> PMachine<'_> {
        PMachine::new(
            resources,
            EngineConfig {
                version,
                ..EngineConfig::headless()
            },
            Box::<NullDisplay>::default(),
            Box::<ScriptedEvents>::default(),
        )
    }

    #[test]
    fn pic_not_valid_returns_the_old_value() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources, SciVersion::Sci0);
        assert_eq!(pm.call_kernel("PicNotValid", &[Register::value(1)]), Ok(Register::value(0)));
        assert_eq!(pm.call_kernel("PicNotValid", &[]), Ok(Register::value(1)));
    }

    #[test_case(100, 6 ; "middle band")]
    #[test_case(0, 0 ; "above the bands")]
    #[test_case(189, 14 ; "bottom")]
    fn coord_pri_and_back(y: i16, priority: i16) {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources, SciVersion::Sci0);
        assert_eq!(pm.call_kernel("CoordPri", &[Register::value(y)]), Ok(Register::value(priority)));
        let start = pm.call_kernel("PriCoord", &[Register::value(priority)]).unwrap().to_i16();
        assert!(start <= y);
        assert_eq!(pm.call_kernel("CoordPri", &[Register::value(start)]), Ok(Register::value(priority)));
    }

    #[test]
    fn fill_box_any_shows_up_in_on_control() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources, SciVersion::Sci0);
        let args = [11, 20, 30, 25, 40, 4, 0, 0, 3].map(Register::value);
        pm.call_kernel("Graph", &args).unwrap();
        assert_eq!(pm.call_kernel("OnControl", &[Register::value(4), Register::value(35), Register::value(22)]), Ok(Register::value(1 << 3)));
        assert_eq!(pm.call_kernel("OnControl", &[Register::value(4), Register::value(10), Register::value(10)]), Ok(Register::value(1)));
        // the rect form sees both
        let rect = [4, 25, 15, 45, 30].map(Register::value);
        assert_eq!(pm.call_kernel("OnControl", &rect), Ok(Register::value(1 << 3 | 1)));
        assert_eq!(pm.call_kernel("Graph", &[Register::value(2)]), Ok(Register::value(16)));
    }
}
