use log::{debug, info, warn};

use crate::{
    config::SciVersion,
    error::VmResult,
    graphics::{Rect, SavedBits, MASK_ALL, MASK_CONTROL, MASK_PRIORITY, MASK_VISUAL, PORT_HEIGHT},
    heap::Register,
    pmachine::{AbortRequest, PMachine},
};

/// Bits of an actor's `signal` property
pub mod signal {
    pub const STOP_UPDATE: u16 = 0x0001;
    pub const VIEW_UPDATED: u16 = 0x0002;
    pub const NO_UPDATE: u16 = 0x0004;
    pub const HIDDEN: u16 = 0x0008;
    pub const FIXED_PRIORITY: u16 = 0x0010;
    pub const ALWAYS_UPDATE: u16 = 0x0020;
    pub const FORCE_UPDATE: u16 = 0x0040;
    pub const REMOVE_VIEW: u16 = 0x0080;
    pub const FROZEN: u16 = 0x0100;
    pub const IS_EXTRA: u16 = 0x0200;
    pub const HIT_OBSTACLE: u16 = 0x0400;
    pub const DOESNT_TURN: u16 = 0x0800;
    pub const NO_CYCLER: u16 = 0x1000;
    pub const IGNORE_HORIZON: u16 = 0x2000;
    pub const IGNORE_ACTOR: u16 = 0x4000;
    pub const DISPOSE_ME: u16 = 0x8000;
}

pub const SCALE_SIGNAL_DO_SCALING: u16 = 0x0001;
pub const SCALE_SIGNAL_GLOBAL_SCALING: u16 = 0x0002;
pub const SCALE_NONE: i16 = 128;

/// Global holding the current room object
const GLOBAL_ROOM: usize = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct AnimateEntry {
    pub given_order: usize,
    pub object: Register,
    pub view: u16,
    pub loop_no: i16,
    pub cel_no: i16,
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub priority: i16,
    pub signal: u16,
    pub scale_signal: u16,
    pub scale_x: i16,
    pub scale_y: i16,
    pub cel_rect: Rect,
    pub show_bits: bool,
    cast_bits: Option<SavedBits>,
}

impl AnimateEntry {
    pub fn for_view(view: u16, loop_no: i16, cel_no: i16, x: i16, y: i16, priority: i16) -> Self {
        AnimateEntry {
            given_order: 0,
            object: Register::NULL,
            view,
            loop_no,
            cel_no,
            x,
            y,
            z: 0,
            priority,
            signal: 0,
            scale_signal: 0,
            scale_x: SCALE_NONE,
            scale_y: SCALE_NONE,
            cel_rect: Rect::default(),
            show_bits: false,
            cast_bits: None,
        }
    }

    fn is_scaled(&self) -> bool {
        self.scale_signal & SCALE_SIGNAL_DO_SCALING != 0
    }

    fn priority_u8(&self) -> u8 {
        self.priority.clamp(0, 15) as u8
    }
}

/// Draw order: y, then z, then position in the cast list.
pub fn sort_entries(entries: &mut [AnimateEntry]) {
    entries.sort_by_key(|e| (e.y, e.z, e.given_order));
}

#[derive(Default)]
pub struct GfxAnimate {
    list: Vec<AnimateEntry>,
    last_cast: Vec<AnimateEntry>,
}

impl GfxAnimate {
    pub fn entries(&self) -> &[AnimateEntry] {
        &self.list
    }

    pub fn last_cast(&self) -> &[AnimateEntry] {
        &self.last_cast
    }

    pub(crate) fn dispose_last_cast(&mut self) {
        self.last_cast.clear();
    }

    pub fn roots(&self) -> impl Iterator<Item = Register> + '_ {
        self.list.iter().chain(&self.last_cast).map(|e| e.object)
    }
}

impl<'a> PMachine<'a> {
    /// One animation tick over the cast list. A null list only shows a pending picture.
    pub(crate) fn kernel_animate(&mut self, cast: Register, cycle: bool, args: &[Register]) -> VmResult<()> {
        let mut old_pic_not_valid = self.pic_not_valid;

        if cast.is_null() {
            self.animate.last_cast.clear();
            if self.pic_not_valid != 0 {
                self.animate_show_pic();
            }
            return Ok(());
        }
        self.heap.list(cast)?;

        if cycle && !self.animate_invoke(cast, args)? {
            return Ok(());
        }

        self.animate.last_cast.clear();
        let mut entries = self.make_sorted_list(cast)?;
        self.animate_fill(&mut entries, &mut old_pic_not_valid)?;
        if old_pic_not_valid != 0 {
            self.animate_update(&mut entries)?;
        }
        self.animate_draw_cels(&mut entries)?;
        if self.pic_not_valid != 0 {
            self.animate_show_pic();
        }
        self.animate_update_screen(&mut entries, old_pic_not_valid)?;
        self.animate.list = entries;
        self.animate_restore_and_delete(args)
    }

    /// Sends `doit` to every cast member that is not frozen. Returns false when a
    /// restore replaced the heap underneath us.
    fn animate_invoke(&mut self, cast: Register, args: &[Register]) -> VmResult<bool> {
        let mut current = self.heap.list(cast)?.first;
        while !current.is_null() {
            let object = self.heap.node(current)?.value;
            let signal = self.selector_i16(object, self.sel.signal) as u16;
            if signal & signal::FROZEN == 0 {
                self.invoke_if_present(object, self.sel.doit, args)?;
                if self.abort != AbortRequest::None {
                    return Ok(false);
                }
            }
            // doit may have deleted the node, which ends the walk
            current = match self.heap.node(current) {
                Ok(node) => node.succ,
                Err(_) => break,
            };
        }
        Ok(true)
    }

    pub(crate) fn make_sorted_list(&self, cast: Register) -> VmResult<Vec<AnimateEntry>> {
        let scaling = self.config.version.actor_scaling();
        let mut entries = Vec::new();
        for (given_order, node) in self.heap.list_nodes(cast)?.into_iter().enumerate() {
            let object = self.heap.node(node)?.value;
            let read = |selector| self.selector_i16(object, selector);
            let scale_signal = if scaling { read(self.sel.scale_signal) as u16 } else { 0 };
            let (scale_x, scale_y) = if scale_signal & SCALE_SIGNAL_DO_SCALING != 0 {
                (read(self.sel.scale_x), read(self.sel.scale_y))
            } else {
                (SCALE_NONE, SCALE_NONE)
            };
            entries.push(AnimateEntry {
                given_order,
                object,
                view: read(self.sel.view) as u16,
                loop_no: read(self.sel.loop_),
                cel_no: read(self.sel.cel),
                x: read(self.sel.x),
                y: read(self.sel.y),
                z: read(self.sel.z),
                priority: read(self.sel.priority),
                signal: read(self.sel.signal) as u16,
                scale_signal,
                scale_x,
                scale_y,
                cel_rect: Rect::default(),
                show_bits: false,
                cast_bits: None,
            });
        }
        sort_entries(&mut entries);
        Ok(entries)
    }

    pub(crate) fn animate_fill(&mut self, entries: &mut [AnimateEntry], old_pic_not_valid: &mut i16) -> VmResult<()> {
        let vga = self.config.version.vga_views();
        for entry in entries.iter_mut() {
            let (loop_reset, cel_reset, cel_height) = {
                let view = self.views.get(self.resources, entry.view, vga)?;
                let loop_count = view.loop_count() as i16;
                let loop_reset = entry.loop_no >= loop_count;
                if loop_reset {
                    entry.loop_no = 0;
                } else if entry.loop_no < 0 {
                    // negative numbers wrap to the last loop without touching the object
                    entry.loop_no = loop_count - 1;
                }
                let cel_count = view.cel_count(entry.loop_no.max(0) as usize) as i16;
                let cel_reset = entry.cel_no >= cel_count;
                if cel_reset {
                    entry.cel_no = 0;
                } else if entry.cel_no < 0 {
                    entry.cel_no = cel_count - 1;
                }
                let cel_height = view
                    .cel(entry.loop_no.max(0) as usize, entry.cel_no.max(0) as usize)
                    .map_or(0, |c| c.height as i32);
                (loop_reset, cel_reset, cel_height)
            };
            if loop_reset {
                self.set_selector_i16(entry.object, self.sel.loop_, 0)?;
            }
            if cel_reset {
                self.set_selector_i16(entry.object, self.sel.cel, 0)?;
            }

            if entry.is_scaled() && entry.scale_signal & SCALE_SIGNAL_GLOBAL_SCALING != 0 {
                self.apply_global_scaling(entry, cel_height)?;
            }

            entry.cel_rect = match self.entry_rect(entry) {
                Ok(rect) => rect,
                Err(e) => {
                    warn!("{}: {e}", self.heap.object_name(entry.object));
                    Rect::default()
                }
            };
            // a scaled actor that will not be drawn keeps its old now-seen rect
            if !(entry.is_scaled() && entry.signal & signal::HIDDEN != 0 && entry.signal & signal::ALWAYS_UPDATE == 0) {
                self.write_rect(entry.object, entry.cel_rect, RectSelectors::NowSeen)?;
            }

            if entry.signal & signal::FIXED_PRIORITY == 0 {
                entry.priority = self.bands.coordinate_to_priority(entry.y) as i16;
                self.set_selector_i16(entry.object, self.sel.priority, entry.priority)?;
            }

            let s = entry.signal;
            if s & signal::NO_UPDATE != 0 {
                let hidden = s & signal::HIDDEN != 0;
                let removed = s & signal::REMOVE_VIEW != 0;
                if s & (signal::FORCE_UPDATE | signal::VIEW_UPDATED) != 0
                    || hidden != removed
                    || s & signal::ALWAYS_UPDATE != 0
                {
                    *old_pic_not_valid += 1;
                }
                entry.signal &= !signal::STOP_UPDATE;
            } else {
                if s & (signal::STOP_UPDATE | signal::ALWAYS_UPDATE) != 0 {
                    *old_pic_not_valid += 1;
                }
                entry.signal &= !signal::FORCE_UPDATE;
            }
        }
        Ok(())
    }

    fn entry_rect(&self, entry: &AnimateEntry) -> VmResult<Rect> {
        let view = self.views.get(self.resources, entry.view, self.config.version.vga_views())?;
        let (loop_no, cel_no) = (entry.loop_no.max(0) as usize, entry.cel_no.max(0) as usize);
        if entry.is_scaled() {
            view.cel_scaled_rect(loop_no, cel_no, entry.x, entry.y, entry.z, entry.scale_x, entry.scale_y)
        } else {
            view.cel_rect(loop_no, cel_no, entry.x, entry.y, entry.z)
        }
    }

    /// Perspective scaling from the room's vanishing point
    fn apply_global_scaling(&mut self, entry: &mut AnimateEntry, cel_height: i32) -> VmResult<()> {
        let max_scale = self.selector_i16(entry.object, self.sel.max_scale) as i32;
        let room = self.global(GLOBAL_ROOM);
        let vanishing_y = self.selector_i16(room, self.sel.vanishing_y) as i32;
        let port_y = PORT_HEIGHT as i32 - vanishing_y;
        let entry_y = match entry.y as i32 - vanishing_y {
            0 => 1,
            y => y,
        };
        if cel_height == 0 || port_y == 0 {
            warn!("Cannot scale {}, skipping", self.heap.object_name(entry.object));
            return Ok(());
        }
        let max_cel_height = (max_scale * cel_height) >> 7;
        let scale = ((max_cel_height * entry_y) / port_y) * 128 / cel_height;
        entry.scale_x = scale as i16;
        entry.scale_y = scale as i16;
        self.set_selector_i16(entry.object, self.sel.scale_x, entry.scale_x)?;
        self.set_selector_i16(entry.object, self.sel.scale_y, entry.scale_y)
    }

    fn animate_update(&mut self, entries: &mut [AnimateEntry]) -> VmResult<()> {
        // take down no-update cels, last drawn first
        for entry in entries.iter_mut().rev() {
            if entry.signal & signal::NO_UPDATE != 0 {
                if entry.signal & signal::REMOVE_VIEW == 0 {
                    let handle = self.heap.read_selector(entry.object, self.sel.under_bits).unwrap_or_default();
                    if self.pic_not_valid != 1 {
                        self.restore_bits(handle);
                        entry.show_bits = true;
                    } else {
                        self.free_bits(handle);
                    }
                    self.set_selector(entry.object, self.sel.under_bits, Register::NULL)?;
                }
                entry.signal &= !signal::FORCE_UPDATE;
                if entry.signal & signal::VIEW_UPDATED != 0 {
                    entry.signal &= !(signal::VIEW_UPDATED | signal::NO_UPDATE);
                }
            } else if entry.signal & signal::STOP_UPDATE != 0 {
                entry.signal &= !signal::STOP_UPDATE;
                entry.signal |= signal::NO_UPDATE;
            }
        }

        for entry in entries.iter_mut() {
            if entry.signal & signal::ALWAYS_UPDATE != 0 {
                self.draw_entry(entry)?;
                entry.show_bits = true;
                entry.signal &= !(signal::STOP_UPDATE | signal::VIEW_UPDATED | signal::FORCE_UPDATE);
                if entry.signal & signal::IGNORE_ACTOR == 0 {
                    self.fill_control_footprint(entry.cel_rect, entry.priority_u8(), 15);
                }
            }
        }

        for entry in entries.iter_mut() {
            if entry.signal & signal::NO_UPDATE != 0 {
                if entry.signal & signal::HIDDEN != 0 {
                    entry.signal |= signal::REMOVE_VIEW;
                } else {
                    entry.signal &= !signal::REMOVE_VIEW;
                    let mask = if entry.signal & signal::IGNORE_ACTOR != 0 {
                        MASK_VISUAL | MASK_PRIORITY
                    } else {
                        MASK_ALL
                    };
                    let handle = self.save_bits(entry.cel_rect, mask);
                    self.set_selector(entry.object, self.sel.under_bits, handle)?;
                }
            }
        }

        for entry in entries.iter_mut() {
            if entry.signal & signal::NO_UPDATE != 0 && entry.signal & signal::HIDDEN == 0 {
                self.draw_entry(entry)?;
                entry.show_bits = true;
                if entry.signal & signal::IGNORE_ACTOR == 0 {
                    self.fill_control_footprint(entry.cel_rect, entry.priority_u8(), 15);
                }
            }
        }
        Ok(())
    }

    fn animate_draw_cels(&mut self, entries: &mut [AnimateEntry]) -> VmResult<()> {
        self.animate.last_cast.clear();
        for entry in entries.iter_mut() {
            if entry.signal & (signal::NO_UPDATE | signal::HIDDEN | signal::ALWAYS_UPDATE) == 0 {
                let handle = self.save_bits(entry.cel_rect, MASK_ALL);
                self.set_selector(entry.object, self.sel.under_bits, handle)?;
                self.draw_entry(entry)?;
                entry.show_bits = true;
                entry.signal &= !signal::REMOVE_VIEW;
                self.animate.last_cast.push(entry.clone());
            }
        }
        Ok(())
    }

    fn animate_update_screen(&mut self, entries: &mut [AnimateEntry], old_pic_not_valid: i16) -> VmResult<()> {
        for entry in entries.iter_mut() {
            let s = entry.signal;
            let stale_no_update = s & signal::REMOVE_VIEW == 0 && s & signal::NO_UPDATE != 0 && old_pic_not_valid != 0;
            if !(entry.show_bits || s & (signal::REMOVE_VIEW | signal::NO_UPDATE) == 0 || stale_no_update) {
                continue;
            }
            let last_seen = self.read_rect(entry.object, RectSelectors::LastSeen);
            let area = if last_seen.clip(&entry.cel_rect).is_empty() {
                self.show_bits(last_seen);
                entry.cel_rect
            } else {
                last_seen.extend(&entry.cel_rect)
            };
            self.write_rect(entry.object, entry.cel_rect, RectSelectors::LastSeen)?;
            self.show_bits(area);

            if entry.signal & signal::HIDDEN != 0 {
                entry.signal |= signal::REMOVE_VIEW;
            }
        }
        Ok(())
    }

    /// Writes the signals back, then takes down moving cels and disposes of the
    /// actors that asked for it.
    fn animate_restore_and_delete(&mut self, args: &[Register]) -> VmResult<()> {
        let entries = self.animate.list.clone();
        // a dispose can change a sibling's signal, so every signal is written first
        for entry in &entries {
            self.set_selector_i16(entry.object, self.sel.signal, entry.signal as i16)?;
        }

        for entry in entries.iter().rev() {
            let signal = self.selector_i16(entry.object, self.sel.signal) as u16;
            if signal & (signal::NO_UPDATE | signal::REMOVE_VIEW) == 0 {
                let handle = self.heap.read_selector(entry.object, self.sel.under_bits).unwrap_or_default();
                self.restore_bits(handle);
                self.set_selector(entry.object, self.sel.under_bits, Register::NULL)?;
            }
            if signal & signal::DISPOSE_ME != 0 {
                debug!("Disposing of {}", self.heap.object_name(entry.object));
                self.invoke_if_present(entry.object, self.sel.delete, args)?;
                if self.abort != AbortRequest::None {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Draws the last cast over `rect` and blits it without disturbing the picture underneath
    pub fn re_animate(&mut self, rect: Rect) -> VmResult<()> {
        let mut cast = std::mem::take(&mut self.animate.last_cast);
        for entry in cast.iter_mut() {
            entry.cast_bits = Some(self.screen.bits_save(entry.cel_rect.port_to_screen(), MASK_VISUAL | MASK_PRIORITY));
            self.draw_entry(entry)?;
        }
        self.show_bits(rect);
        for entry in cast.iter_mut().rev() {
            if let Some(bits) = entry.cast_bits.take() {
                self.screen.bits_restore(&bits);
            }
        }
        self.animate.last_cast = cast;
        Ok(())
    }

    pub(crate) fn add_to_pic(&mut self, cast: Register) -> VmResult<()> {
        let mut entries = self.make_sorted_list(cast)?;
        for entry in entries.iter_mut() {
            if entry.priority == -1 {
                entry.priority = self.bands.coordinate_to_priority(entry.y) as i16;
            }
            self.add_entry_to_pic(entry)?;
        }
        self.mark_picture_changed();
        Ok(())
    }

    pub(crate) fn add_entry_to_pic(&mut self, entry: &mut AnimateEntry) -> VmResult<()> {
        entry.cel_rect = self.entry_rect(entry)?;
        self.draw_entry(entry)?;
        if entry.signal & signal::IGNORE_ACTOR == 0 {
            self.fill_control_footprint(entry.cel_rect, entry.priority_u8(), 15);
        }
        Ok(())
    }

    pub(crate) fn add_view_to_pic(&mut self, mut entry: AnimateEntry, control: Option<u8>) -> VmResult<()> {
        if entry.priority == -1 {
            entry.priority = self.bands.coordinate_to_priority(entry.y) as i16;
        }
        entry.cel_rect = self.entry_rect(&entry)?;
        self.draw_entry(&entry)?;
        if let Some(control) = control {
            self.fill_control_footprint(entry.cel_rect, entry.priority_u8(), control);
        }
        self.mark_picture_changed();
        Ok(())
    }

    fn mark_picture_changed(&mut self) {
        self.pic_not_valid = if self.config.version >= SciVersion::Sci01 { 2 } else { 1 };
    }

    fn draw_entry(&mut self, entry: &AnimateEntry) -> VmResult<()> {
        let view = self.views.get(self.resources, entry.view, self.config.version.vga_views())?;
        let (loop_no, cel_no) = (entry.loop_no.max(0) as usize, entry.cel_no.max(0) as usize);
        if view.cel(loop_no, cel_no).is_none() || entry.cel_rect.is_empty() {
            return Ok(());
        }
        view.draw(
            &mut self.screen,
            loop_no,
            cel_no,
            entry.cel_rect.port_to_screen(),
            Rect::port().port_to_screen(),
            entry.priority_u8(),
        )
    }

    /// Marks the control plane under an actor's base, from its priority band down
    fn fill_control_footprint(&mut self, rect: Rect, priority: u8, control: u8) {
        let mut rect = rect;
        let band_top = self.bands.priority_to_coordinate(priority) - 1;
        rect.top = band_top.max(rect.top).min(rect.bottom.saturating_sub(1));
        self.screen.fill_rect(rect.port_to_screen(), MASK_CONTROL, 0, 0, control);
    }

    pub(crate) fn animate_show_pic(&mut self) {
        info!("Showing picture {}", self.pic_number);
        self.screen.copy_rect_to_screen(Rect::port().port_to_screen());
        self.pic_not_valid = 0;
    }

    pub(crate) fn show_bits(&mut self, rect: Rect) {
        let area = rect.clip(&Rect::port());
        if !area.is_empty() {
            self.screen.copy_rect_to_screen(area.port_to_screen());
        }
    }

    pub(crate) fn save_bits(&mut self, rect: Rect, mask: u8) -> Register {
        let bits = self.screen.bits_save(rect.port_to_screen(), mask);
        self.heap.allocate(bits)
    }

    pub(crate) fn restore_bits(&mut self, handle: Register) {
        if handle.is_null() {
            return;
        }
        match self.heap.free::<SavedBits>(handle) {
            Ok(bits) => self.screen.bits_restore(&bits),
            Err(_) => self.heap.warn_dangling(handle, "restoring bits"),
        }
    }

    pub(crate) fn free_bits(&mut self, handle: Register) {
        if !handle.is_null() && self.heap.free::<SavedBits>(handle).is_err() {
            self.heap.warn_dangling(handle, "freeing bits");
        }
    }

    pub(crate) fn read_rect(&self, object: Register, selectors: RectSelectors) -> Rect {
        let [left, top, right, bottom] = self.rect_selectors(selectors);
        Rect::new(
            self.selector_i16(object, left),
            self.selector_i16(object, top),
            self.selector_i16(object, right),
            self.selector_i16(object, bottom),
        )
    }

    pub(crate) fn write_rect(&mut self, object: Register, rect: Rect, selectors: RectSelectors) -> VmResult<()> {
        let [left, top, right, bottom] = self.rect_selectors(selectors);
        self.set_selector_i16(object, left, rect.left)?;
        self.set_selector_i16(object, top, rect.top)?;
        self.set_selector_i16(object, right, rect.right)?;
        self.set_selector_i16(object, bottom, rect.bottom)
    }

    fn rect_selectors(&self, selectors: RectSelectors) -> [u16; 4] {
        let s = &self.sel;
        match selectors {
            RectSelectors::NowSeen => [s.ns_left, s.ns_top, s.ns_right, s.ns_bottom],
            RectSelectors::LastSeen => [s.ls_left, s.ls_top, s.ls_right, s.ls_bottom],
            RectSelectors::Base => [s.br_left, s.br_top, s.br_right, s.br_bottom],
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum RectSelectors {
    NowSeen,
    LastSeen,
    Base,
}
