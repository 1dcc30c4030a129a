use log::debug;

pub const SCREEN_WIDTH: i16 = 320;
pub const SCREEN_HEIGHT: i16 = 200;

/// The picture port sits below the menu bar; everything scripts see is relative to it.
pub const PORT_TOP: i16 = 10;
pub const PORT_HEIGHT: i16 = SCREEN_HEIGHT - PORT_TOP;

pub const MASK_VISUAL: u8 = 1;
pub const MASK_PRIORITY: u8 = 2;
pub const MASK_CONTROL: u8 = 4;
pub const MASK_ALL: u8 = MASK_VISUAL | MASK_PRIORITY | MASK_CONTROL;

pub const WHITE: u8 = 15;

#[derive(Clone)]
pub struct Colour {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}
impl Colour {
    // See https://en.wikipedia.org/wiki/Enhanced_Graphics_Adapter
    const EGA_COLOURS: [[u8; 3]; 16] = [
        [0, 0, 0],       // Black
        [0, 0, 170],     // Blue
        [0, 170, 0],     // Green
        [0, 170, 170],   // Cyan
        [170, 0, 0],     // Red
        [170, 0, 170],   // Magenta
        [170, 85, 0],    // Brown
        [170, 170, 170], // Light grey
        [85, 85, 85],    // Dark grey
        [85, 85, 255],   // Bright blue
        [85, 255, 85],   // Bright green
        [85, 255, 255],  // Bright cyan
        [255, 85, 85],   // Bright red
        [255, 85, 255],  // Bright magenta
        [255, 255, 85],  // Bright yellow
        [255, 255, 255], // White
    ];

    pub fn from_ega(c: u8) -> Self {
        let [r, g, b] = Self::EGA_COLOURS[(c & 0xf) as usize];
        Self { r, g, b }
    }
}

/// Half-open rectangle: `right` and `bottom` are exclusive.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}

impl Rect {
    pub const fn new(left: i16, top: i16, right: i16, bottom: i16) -> Self {
        Self {
            top,
            left,
            bottom,
            right,
        }
    }

    /// Builds a rect from wide coordinates, saturating each edge to the 16-bit range
    pub fn saturating(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        let edge = |v: i32| v.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        Self::new(edge(left), edge(top), edge(right), edge(bottom))
    }

    pub fn screen() -> Self {
        Self::new(0, 0, SCREEN_WIDTH, SCREEN_HEIGHT)
    }

    pub fn port() -> Self {
        Self::new(0, 0, SCREEN_WIDTH, PORT_HEIGHT)
    }

    pub fn width(&self) -> i16 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> i16 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    pub fn contains(&self, x: i16, y: i16) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    pub fn clip(&self, other: &Rect) -> Rect {
        Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        )
    }

    pub fn extend(&self, other: &Rect) -> Rect {
        Rect::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    pub fn translate(&self, dx: i16, dy: i16) -> Rect {
        Rect::new(
            self.left.saturating_add(dx),
            self.top.saturating_add(dy),
            self.right.saturating_add(dx),
            self.bottom.saturating_add(dy),
        )
    }

    pub fn port_to_screen(&self) -> Rect {
        self.translate(0, PORT_TOP)
    }
}

pub trait Display {
    fn update(&mut self, visual: &[u8], rect: Rect);
}

#[derive(Default)]
pub struct NullDisplay {
    pub updates: usize,
}

impl Display for NullDisplay {
    fn update(&mut self, _visual: &[u8], rect: Rect) {
        debug!("Display update {rect:?}");
        self.updates += 1;
    }
}

/// Screen contents under a rect, kept so sprites can be erased later
#[derive(Clone, Debug, PartialEq)]
pub struct SavedBits {
    pub rect: Rect,
    pub mask: u8,
    visual: Vec<u8>,
    priority: Vec<u8>,
    control: Vec<u8>,
}

pub struct GfxScreen {
    visual: Vec<u8>,
    priority: Vec<u8>,
    control: Vec<u8>,
    display: Box<dyn Display>,
}

impl GfxScreen {
    const PLANE_SIZE: usize = SCREEN_WIDTH as usize * SCREEN_HEIGHT as usize;

    pub fn new(display: Box<dyn Display>) -> Self {
        Self {
            visual: vec![0; Self::PLANE_SIZE],
            priority: vec![0; Self::PLANE_SIZE],
            control: vec![0; Self::PLANE_SIZE],
            display,
        }
    }

    fn index(x: i16, y: i16) -> Option<usize> {
        Rect::screen()
            .contains(x, y)
            .then(|| y as usize * SCREEN_WIDTH as usize + x as usize)
    }

    pub fn put_pixel(&mut self, x: i16, y: i16, mask: u8, colour: u8, priority: u8, control: u8) {
        let Some(i) = Self::index(x, y) else {
            return;
        };
        if mask & MASK_VISUAL != 0 {
            self.visual[i] = colour;
        }
        if mask & MASK_PRIORITY != 0 {
            self.priority[i] = priority;
        }
        if mask & MASK_CONTROL != 0 {
            self.control[i] = control;
        }
    }

    pub fn get_visual(&self, x: i16, y: i16) -> u8 {
        Self::index(x, y).map_or(0, |i| self.visual[i])
    }

    pub fn get_priority(&self, x: i16, y: i16) -> u8 {
        Self::index(x, y).map_or(0, |i| self.priority[i])
    }

    pub fn get_control(&self, x: i16, y: i16) -> u8 {
        Self::index(x, y).map_or(0, |i| self.control[i])
    }

    pub fn fill_rect(&mut self, rect: Rect, mask: u8, colour: u8, priority: u8, control: u8) {
        let rect = rect.clip(&Rect::screen());
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                self.put_pixel(x, y, mask, colour, priority, control);
            }
        }
    }

    pub fn control_mask(&self, rect: Rect) -> u16 {
        self.plane_mask(rect, MASK_CONTROL)
    }

    /// Bit n is set if value n occurs in the plane under `rect`
    pub fn plane_mask(&self, rect: Rect, plane: u8) -> u16 {
        let get = match plane {
            MASK_VISUAL => Self::get_visual,
            MASK_PRIORITY => Self::get_priority,
            _ => Self::get_control,
        };
        let rect = rect.clip(&Rect::screen());
        let mut result = 0;
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                result |= 1 << (get(self, x, y) & 0xf);
            }
        }
        result
    }

    pub fn bits_save(&self, rect: Rect, mask: u8) -> SavedBits {
        let rect = rect.clip(&Rect::screen());
        let mut bits = SavedBits {
            rect,
            mask,
            visual: Vec::new(),
            priority: Vec::new(),
            control: Vec::new(),
        };
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                if mask & MASK_VISUAL != 0 {
                    bits.visual.push(self.get_visual(x, y));
                }
                if mask & MASK_PRIORITY != 0 {
                    bits.priority.push(self.get_priority(x, y));
                }
                if mask & MASK_CONTROL != 0 {
                    bits.control.push(self.get_control(x, y));
                }
            }
        }
        bits
    }

    pub fn bits_restore(&mut self, bits: &SavedBits) {
        let rect = bits.rect;
        let mut i = 0;
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                let value = |plane: &[u8]| plane.get(i).copied().unwrap_or(0);
                self.put_pixel(
                    x,
                    y,
                    bits.mask,
                    value(&bits.visual),
                    value(&bits.priority),
                    value(&bits.control),
                );
                i += 1;
            }
        }
    }

    pub fn copy_rect_to_screen(&mut self, rect: Rect) {
        let rect = rect.clip(&Rect::screen());
        if !rect.is_empty() {
            self.display.update(&self.visual, rect);
        }
    }

    pub fn visual(&self) -> &[u8] {
        &self.visual
    }

    pub fn priority(&self) -> &[u8] {
        &self.priority
    }

    pub fn control(&self) -> &[u8] {
        &self.control
    }
}

/// Maps y coordinates to the coarse depth bands used for occlusion.
#[derive(Clone, Debug)]
pub struct PriorityBands {
    bands: Vec<u8>,
    top: i16,
    bottom: i16,
}

impl PriorityBands {
    pub fn new(band_count: i32, top: i16, bottom: i16) -> Self {
        let height = (bottom - top) as i32;
        let band_size = (height * 2000) / band_count;
        let bands = (0..SCREEN_HEIGHT)
            .map(|y| {
                if y < top {
                    0
                } else if y >= bottom {
                    band_count as u8
                } else {
                    (1 + ((y - top) as i32 * 2000) / band_size).min(band_count) as u8
                }
            })
            .collect();
        Self { bands, top, bottom }
    }

    pub fn coordinate_to_priority(&self, y: i16) -> u8 {
        if y < 0 {
            return 0;
        }
        self.bands
            .get(y as usize)
            .copied()
            .unwrap_or_else(|| self.bands.last().copied().unwrap_or(0))
    }

    pub fn priority_to_coordinate(&self, priority: u8) -> i16 {
        self.bands
            .iter()
            .position(|&b| b == priority)
            .map_or(self.bottom, |y| y as i16)
    }

    pub fn top(&self) -> i16 {
        self.top
    }
}

impl Default for PriorityBands {
    fn default() -> Self {
        PriorityBands::new(14, 42, PORT_HEIGHT)
    }
}

pub(crate) fn bresenham<F>(start: (i32, i32), end: (i32, i32), f: &mut F)
where
    F: FnMut(i32, i32),
{
    let dx = (end.0 - start.0).abs();
    let step_x = if start.0 < end.0 { 1 } else { -1 };
    let dy = -(end.1 - start.1).abs();
    let step_y = if start.1 < end.1 { 1 } else { -1 };

    let mut err = dx + dy;
    let (mut x, mut y) = start;

    loop {
        f(x, y);

        if x == end.0 && y == end.1 {
            break;
        }

        let e2 = err * 2;
        if e2 >= dy {
            err += dy;
            x += step_x;
        }
        if e2 <= dx {
            err += dx;
            y += step_y;
        }
    }
}
