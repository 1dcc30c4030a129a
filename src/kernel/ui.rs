use log::{debug, info, warn};

use super::KernelArgs;
use crate::{
    error::VmResult,
    heap::Register,
    pmachine::{PMachine, PICTURE_PORT},
};

const FONT_WIDTH: usize = 8;
const FONT_HEIGHT: usize = 8;
const DEFAULT_TEXT_WIDTH: usize = 192;

/// NewWindow(top, left, bottom, right, title, ...): opens a window and makes it the port
pub(super) fn new_window(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let title = match args.get(4) {
        r if r.is_null() => Vec::new(),
        r => pm.heap.read_string(r).unwrap_or_default(),
    };
    info!(
        "Kernel> NewWindow ({}, {}, {}, {}) '{}'",
        args.i16(1),
        args.i16(0),
        args.i16(3),
        args.i16(2),
        String::from_utf8_lossy(&title)
    );
    let mut buf = title;
    buf.push(0);
    let window = pm.heap.allocate_dynmem("window", buf);
    pm.port = window;
    Ok(window)
}

pub(super) fn dispose_window(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let window = args.get(0);
    info!("Kernel> DisposeWindow {}", window);
    if pm.port == window {
        pm.port = PICTURE_PORT;
    }
    if !pm.heap.free_dynmem(window) {
        warn!("DisposeWindow of {} which is not a window", window);
    }
    Ok(pm.registers.acc)
}

pub(super) fn get_port(pm: &mut PMachine<'_>, _args: &KernelArgs) -> VmResult<Register> {
    Ok(pm.port)
}

pub(super) fn set_port(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    if args.len() >= 6 {
        // resizes the picture port
        info!("Kernel> SetPort picture port {:?}", args.rest(0));
        return Ok(pm.registers.acc);
    }
    let port = args.get(0);
    debug!("Kernel> SetPort {}", port);
    pm.port = if port.is_null() { PICTURE_PORT } else { port };
    Ok(pm.registers.acc)
}

pub(super) fn display(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let text = pm.lookup_text(args.get(0), args.get(1))?;
    info!("Kernel> Display '{}'", String::from_utf8_lossy(&text));
    Ok(pm.registers.acc)
}

/// Extent of `text` in the fixed 8x8 font, wrapped at `max_width` pixels
fn text_extent(text: &[u8], max_width: usize) -> (usize, usize) {
    let per_line = (max_width / FONT_WIDTH).max(1);
    let (mut width, mut lines) = (0, 0);
    for line in text.split(|&b| b == b'\n') {
        let wrapped = line.len().div_ceil(per_line).max(1);
        lines += wrapped;
        width = width.max(line.len().min(per_line) * FONT_WIDTH);
    }
    (width, lines * FONT_HEIGHT)
}

pub(super) fn text_size(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let rect = args.get(0);
    let text = pm.heap.read_string(args.get(1))?;
    let max_width = match args.i16(3) {
        w if w > 0 => w as usize,
        _ => DEFAULT_TEXT_WIDTH,
    };
    let (width, height) = text_extent(&text, max_width);
    debug!("Kernel> TextSize '{}' = {}x{}", String::from_utf8_lossy(&text), width, height);
    for (i, value) in [0, 0, height as u16, width as u16].into_iter().enumerate() {
        pm.heap.write_word(rect, i * 2, value)?;
    }
    Ok(pm.registers.acc)
}

pub(super) fn draw_control(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    debug!("Kernel> DrawControl {}", pm.heap.object_name(args.get(0)));
    Ok(pm.registers.acc)
}

pub(super) fn edit_control(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    debug!("Kernel> EditControl {} event {}", pm.heap.object_name(args.get(0)), args.get(1));
    Ok(pm.registers.acc)
}

pub(super) fn menu(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    debug!("Kernel> menu or status call {:?}", args.as_slice());
    Ok(pm.registers.acc)
}

pub(super) fn menu_select(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    debug!("Kernel> MenuSelect {}", args.get(0));
    Ok(Register::NULL)
}

pub(super) fn get_menu(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    debug!("Kernel> GetMenu {:x} {}", args.u16(0), args.u16(1));
    Ok(Register::NULL)
}

/// Parse(input, event): no sentence is ever understood
pub(super) fn parse(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let input = pm.heap.read_str(args.get(0)).unwrap_or_default();
    info!("Kernel> Parse '{}'", input);
    Ok(Register::NULL)
}

pub(super) fn said(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    debug!("Kernel> Said {}", args.get(0));
    Ok(Register::NULL)
}

pub(super) fn set_synonyms(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    debug!("Kernel> SetSynonyms {}", args.get(0));
    Ok(pm.registers.acc)
}

pub(super) fn set_cursor(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    debug!("Kernel> SetCursor {:?}", args.as_slice());
    Ok(pm.registers.acc)
}

pub(super) fn do_sound(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    debug!("Kernel> DoSound {:?}", args.as_slice());
    Ok(Register::NULL)
}

pub(super) fn shake_screen(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    info!("Kernel> ShakeScreen {} times", args.i16(0));
    Ok(pm.registers.acc)
}

pub(super) fn joystick(_pm: &mut PMachine<'_>, _args: &KernelArgs) -> VmResult<Register> {
    Ok(Register::NULL)
}

pub(super) fn do_avoider(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    debug!("Kernel> DoAvoider {}", args.get(0));
    Ok(Register::NULL)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;
    use crate::{
        config::EngineConfig, events::ScriptedEvents, graphics::NullDisplay, heap::tests::class_resources,
        resource::ResourceManager,
    };

    fn machine(resources: &ResourceManager) -> PMachine<'_> {
        PMachine::new(
            resources,
            EngineConfig::headless(),
            Box::<NullDisplay>::default(),
            Box::<ScriptedEvents>::default(),
        )
    }

    #[test_case(b"", 192, (0, 8) ; "empty")]
    #[test_case(b"Hello", 192, (40, 8) ; "one line")]
    #[test_case(b"Hello\nthere, world", 192, (96, 16) ; "two lines")]
    #[test_case(b"abcdefghij", 32, (32, 24) ; "wrapped")]
    fn measures_text(text: &[u8], max_width: usize, expected: (usize, usize)) {
        assert_eq!(text_extent(text, max_width), expected);
    }

    #[test]
    fn windows_become_the_port_until_disposed() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources);
        assert_eq!(pm.call_kernel("GetPort", &[]), Ok(PICTURE_PORT));

        let title = pm.heap.allocate_dynmem("title", b"Inventory\0".to_vec());
        let args = [10, 10, 100, 200].map(Register::value);
        let window = pm
            .call_kernel("NewWindow", &[args[0], args[1], args[2], args[3], title])
            .unwrap();
        assert!(!window.is_null());
        assert_eq!(pm.heap.read_str(window).unwrap(), "Inventory");
        assert_eq!(pm.call_kernel("GetPort", &[]), Ok(window));

        pm.call_kernel("DisposeWindow", &[window]).unwrap();
        assert_eq!(pm.call_kernel("GetPort", &[]), Ok(PICTURE_PORT));
        pm.call_kernel("SetPort", &[Register::NULL]).unwrap();
        assert_eq!(pm.call_kernel("GetPort", &[]), Ok(PICTURE_PORT));
    }

    #[test]
    fn text_size_fills_the_rect() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources);
        let rect = pm.heap.allocate_dynmem("rect", vec![0xff; 8]);
        let text = pm.heap.allocate_dynmem("text", b"Hi\0".to_vec());
        pm.call_kernel("TextSize", &[rect, text, Register::value(0), Register::value(0)])
            .unwrap();
        let bytes: Vec<u8> = (0..8).map(|i| pm.heap.read_byte(rect, i).unwrap()).collect();
        assert_eq!(bytes, vec![0, 0, 0, 0, 8, 0, 16, 0]);
    }

    #[test]
    fn disposed_windows_give_back_their_memory() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources);
        pm.collect_garbage();
        let before = pm.heap.segment_ids().count();
        for _ in 0..100 {
            let window = pm.call_kernel("NewWindow", &[Register::value(0); 5]).unwrap();
            pm.call_kernel("DisposeWindow", &[window]).unwrap();
        }
        pm.collect_garbage();
        assert_eq!(pm.heap.segment_ids().count(), before);

        let window = pm.call_kernel("NewWindow", &[Register::value(0); 5]).unwrap();
        pm.call_kernel("DisposeWindow", &[window]).unwrap();
        assert!(pm.heap.read_byte(window, 0).is_err());
    }
}
