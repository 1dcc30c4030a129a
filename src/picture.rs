use num_traits::FromPrimitive;

use crate::{
    graphics::{bresenham, GfxScreen, Rect, MASK_CONTROL, MASK_PRIORITY, MASK_VISUAL, PORT_HEIGHT, PORT_TOP, SCREEN_WIDTH, WHITE},
    resource::Resource,
};

#[derive(FromPrimitive)]
#[repr(u8)]
enum PictureCommand {
    SetVisualColour = 0xf0,
    DisableVisual,
    SetPriorityColour,
    DisablePriority,
    DrawShortRelativePatterns,
    DrawRelativeLines,
    DrawAbsoluteLines,
    DrawShortRelativeLines,
    FloodFill,
    SetPattern,
    DrawAbsolutePatterns,
    SetControlColour,
    DisableControl,
    DrawRelativePatterns,
    ExtendedCommand,
    Finish,
}

#[derive(FromPrimitive)]
#[repr(u8)]
enum ExtendedCommand {
    SetPaletteEntry,
    SetPalette,
    SetMonoPalette,
    SetVisualMono,
    DisableVisualMono,
    SetDirectMonoVisual,
    DisableDirectMonoVisual,
}

enum BrushShape {
    Circle,
    Rectangle,
}

struct PatternBrush {
    size: i32,
    shape: BrushShape,
    use_texture: bool,
}

#[derive(Clone, Copy)]
struct Point {
    x: i32,
    y: i32,
}
impl Point {
    fn offset(&self, x: i32, y: i32) -> Point {
        Point {
            x: self.x + x,
            y: self.y + y,
        }
    }
}

/// How the points after the first in a line or pattern run are encoded
#[derive(Clone, Copy, PartialEq)]
enum Step {
    Absolute,
    Relative,
    ShortRelative,
}

type Palette = [DitheredColour; PALETTE_SIZE];
const PALETTE_SIZE: usize = 40;

#[derive(Clone, Copy, Debug, PartialEq)]
struct DitheredColour {
    c1: u8,
    c2: u8,
}
impl DitheredColour {
    const fn from_ega(c1: u8, c2: u8) -> Self {
        Self { c1, c2 }
    }

    fn at(&self, x: i32, y: i32) -> u8 {
        if (x ^ y) & 1 == 0 {
            self.c1
        } else {
            self.c2
        }
    }

    /// High nibble first, the way pictures store colour pairs
    const fn from_packed(c: u8) -> Self {
        Self::from_ega(c >> 4, c & 0xf)
    }

    fn default_palette() -> Palette {
        DEFAULT_PALETTE.map(DitheredColour::from_packed)
    }
}

const DEFAULT_PALETTE: [u8; PALETTE_SIZE] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99,
    0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x88, 0x88, 0x01, 0x02, 0x03,
    0x04, 0x05, 0x06, 0x88, 0x88, 0xf9, 0xfa, 0xfb, 0xfc, 0xfd,
    0xfe, 0xff, 0x08, 0x91, 0x2a, 0x3b, 0x4c, 0x5d, 0x6e, 0x88,
];

struct Deserializer<'a> {
    index: usize,
    data: &'a [u8],
}

impl<'a> Deserializer<'a> {
    fn new(resource: &'a Resource) -> Self {
        Self {
            index: 0,
            data: &resource.data,
        }
    }

    /// Running off the end reads as the finish command
    fn read_byte(&mut self) -> u8 {
        let v = self.data.get(self.index).copied().unwrap_or(0xff);
        self.index += 1;
        v
    }

    fn read_command(&mut self) -> Option<PictureCommand> {
        FromPrimitive::from_u8(self.read_byte())
    }

    fn read_extended_command(&mut self) -> Option<ExtendedCommand> {
        FromPrimitive::from_u8(self.read_byte())
    }

    fn next_is_command(&self) -> bool {
        self.data.get(self.index).map_or(true, |&b| b >= 0xF0)
    }

    fn read_pattern_brush(&mut self) -> PatternBrush {
        let p = self.read_byte();
        PatternBrush {
            shape: if (p & 0b10000) != 0 {
                BrushShape::Rectangle
            } else {
                BrushShape::Circle
            },
            use_texture: (p & 0b100000) != 0,
            size: (p & 0x7) as i32,
        }
    }

    fn read_palette_entry(&mut self) -> (usize, usize) {
        let v = self.read_byte() as usize;
        ((v / PALETTE_SIZE) % 4, v % PALETTE_SIZE)
    }

    fn read_colour_pair(&mut self) -> DitheredColour {
        DitheredColour::from_packed(self.read_byte())
    }

    fn read_coordinates(&mut self) -> Point {
        let (upper, lower_x, lower_y) = (
            self.read_byte() as i32,
            self.read_byte() as i32,
            self.read_byte() as i32,
        );
        Point {
            x: ((upper & 0xF0) << 4) | lower_x,
            y: ((upper & 0x0F) << 8) | lower_y,
        }
    }

    /// The next point of a run, read in the run's encoding
    fn read_step(&mut self, from: Point, step: Step) -> Point {
        match step {
            Step::Absolute => self.read_coordinates(),
            Step::Relative => {
                // y is sign and magnitude, x is two's complement
                let dy = self.read_byte() as i32;
                let dx = self.read_byte() as i8 as i32;
                from.offset(dx, if dy & 0x80 != 0 { -(dy & 0x7f) } else { dy })
            }
            Step::ShortRelative => {
                let v = self.read_byte() as i32;
                let nibble = |n: i32| if n & 0x8 != 0 { -(n & 0x7) } else { n };
                from.offset(nibble(v >> 4), nibble(v & 0xf))
            }
        }
    }

    fn skip(&mut self, num: usize) {
        self.index += num;
    }
}

struct Pen {
    mask: u8,
    visual: DitheredColour,
    priority: u8,
    control: u8,
}

struct Canvas<'a> {
    screen: &'a mut GfxScreen,
    pen: Pen,
}

impl<'a> Canvas<'a> {
    fn draw_point(&mut self, x: i32, y: i32) {
        if self.pen.mask == 0 || x < 0 || y < 0 || x >= SCREEN_WIDTH as i32 || y >= PORT_HEIGHT as i32 {
            return;
        }
        self.screen.put_pixel(
            x as i16,
            y as i16 + PORT_TOP,
            self.pen.mask,
            self.pen.visual.at(x, y),
            self.pen.priority,
            self.pen.control,
        );
    }

    fn draw_line(&mut self, start: &Point, end: &Point) {
        bresenham((start.x, start.y), (end.x, end.y), &mut |x, y| self.draw_point(x, y))
    }

    /// Fills the area still holding the cleared value of the first enabled plane
    fn flood_fill(&mut self, x: i32, y: i32) {
        let port = Rect::new(0, 0, SCREEN_WIDTH, PORT_HEIGHT);
        if !port.contains(x as i16, y as i16) {
            return;
        }
        let (plane, clear): (fn(&GfxScreen, i16, i16) -> u8, u8) = if self.pen.mask & MASK_VISUAL != 0 {
            (GfxScreen::get_visual, WHITE)
        } else if self.pen.mask & MASK_PRIORITY != 0 {
            (GfxScreen::get_priority, 0)
        } else if self.pen.mask & MASK_CONTROL != 0 {
            (GfxScreen::get_control, 0)
        } else {
            return;
        };
        let fillable = |screen: &GfxScreen, x: i32, y: i32| plane(screen, x as i16, y as i16 + PORT_TOP) == clear;
        if !fillable(&*self.screen, x, y) {
            return;
        }

        let width = SCREEN_WIDTH as usize;
        let mut visited = vec![false; width * PORT_HEIGHT as usize];
        let mut stack = vec![Point { x, y }];
        while let Some(p) = stack.pop() {
            let idx = p.y as usize * width + p.x as usize;
            if visited[idx] || !fillable(&*self.screen, p.x, p.y) {
                continue;
            }
            visited[idx] = true;
            self.draw_point(p.x, p.y);

            if p.x < SCREEN_WIDTH as i32 - 1 {
                stack.push(p.offset(1, 0));
            }
            if p.y < PORT_HEIGHT as i32 - 1 {
                stack.push(p.offset(0, 1));
            }
            if p.x > 0 {
                stack.push(p.offset(-1, 0));
            }
            if p.y > 0 {
                stack.push(p.offset(0, -1));
            }
        }
    }

    fn draw_lines(&mut self, data: &mut Deserializer, step: Step) {
        let mut start = data.read_coordinates();
        while !data.next_is_command() {
            let end = data.read_step(start, step);
            self.draw_line(&start, &end);
            start = end;
        }
    }

    /// Absolute runs may be empty; the others always carry a first point.
    fn draw_patterns(&mut self, data: &mut Deserializer, brush: &PatternBrush, step: Step) {
        let mut last: Option<Point> = None;
        loop {
            if (last.is_some() || step == Step::Absolute) && data.next_is_command() {
                return;
            }
            let texture = brush.use_texture.then(|| data.read_byte());
            let p = match last {
                Some(from) => data.read_step(from, step),
                None => data.read_coordinates(),
            };
            self.draw_pattern(&p, brush, texture);
            last = Some(p);
        }
    }

    fn draw_pattern(&mut self, p: &Point, pattern_brush: &PatternBrush, texture: Option<u8>) {
        // If we exceed boundary actually move the brush rather than clip
        let size = pattern_brush.size;
        let x = p.x.max(size).min(SCREEN_WIDTH as i32 - size - 1);
        let y = p.y.max(size).min(PORT_HEIGHT as i32 - size - 1);

        let mut texture = TextureBits::new(texture);
        match pattern_brush.shape {
            BrushShape::Rectangle => {
                for dy in -size..=size {
                    for dx in -size..=size + 1 {
                        if !pattern_brush.use_texture || texture.next_bit() {
                            self.draw_point(x + dx, y + dy);
                        }
                    }
                }
            }
            BrushShape::Circle => {
                let widths = &PATTERN_WIDTHS[size as usize];
                for y_idx in 0..=size * 2 {
                    let w = widths[y_idx as usize];
                    for x_offset in -w..=w {
                        if !pattern_brush.use_texture || texture.next_bit() {
                            self.draw_point(x + x_offset, y + y_idx - size)
                        }
                    }
                }
            }
        }
    }
}

// These are padded out with zeros to allow a const array of fixed size, but not all bytes are used
const PATTERN_WIDTHS: [[i32; 15]; 8] = [
    [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 2, 2, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 2, 3, 3, 3, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 3, 4, 4, 4, 4, 4, 3, 1, 0, 0, 0, 0, 0, 0],
    [1, 3, 4, 4, 5, 5, 5, 4, 4, 3, 2, 0, 0, 0, 0],
    [2, 4, 5, 5, 6, 6, 6, 6, 6, 5, 5, 4, 2, 0, 0],
    [2, 4, 5, 6, 6, 7, 7, 7, 7, 7, 6, 6, 5, 4, 2],
];

const TEXTURE_DATA: [u8; 32] = [
    0x20, 0x94, 0x02, 0x24, 0x90, 0x82, 0xa4, 0xa2, 0x82, 0x09, 0x0a, 0x22, 0x12, 0x10, 0x42,
    0x14, 0x91, 0x4a, 0x91, 0x11, 0x08, 0x12, 0x25, 0x10, 0x22, 0xa8, 0x14, 0x24, 0x00, 0x50,
    0x24, 0x04,
];

const PATTERN_MAPPING: [u32; 120] = [
    0x00, 0x18, 0x30, 0xc4, 0xdc, 0x65, 0xeb, 0x48, 0x60, 0xbd, 0x89, 0x04, 0x0a, 0xf4, 0x7d,
    0x6d, 0x85, 0xb0, 0x8e, 0x95, 0x1f, 0x22, 0x0d, 0xdf, 0x2a, 0x78, 0xd5, 0x73, 0x1c, 0xb4,
    0x40, 0xa1, 0xb9, 0x3c, 0xca, 0x58, 0x92, 0x34, 0xcc, 0xce, 0xd7, 0x42, 0x90, 0x0f, 0x8b,
    0x7f, 0x32, 0xed, 0x5c, 0x9d, 0xc8, 0x99, 0xad, 0x4e, 0x56, 0xa6, 0xf7, 0x68, 0xb7, 0x25,
    0x82, 0x37, 0x3a, 0x51, 0x69, 0x26, 0x38, 0x52, 0x9e, 0x9a, 0x4f, 0xa7, 0x43, 0x10, 0x80,
    0xee, 0x3d, 0x59, 0x35, 0xcf, 0x79, 0x74, 0xb5, 0xa2, 0xb1, 0x96, 0x23, 0xe0, 0xbe, 0x05,
    0xf5, 0x6e, 0x19, 0xc5, 0x66, 0x49, 0xf0, 0xd1, 0x54, 0xa9, 0x70, 0x4b, 0xa4, 0xe2, 0xe6,
    0xe5, 0xab, 0xe4, 0xd2, 0xaa, 0x4c, 0xe3, 0x06, 0x6f, 0xc6, 0x4a, 0x75, 0xa3, 0x97, 0xe1,
];

struct TextureBits {
    position: u32,
}

impl TextureBits {
    fn new(texture: Option<u8>) -> Self {
        // texture numbers carry a flag in the low bit
        let position = texture.map_or(0, |t| PATTERN_MAPPING[(t >> 1) as usize % PATTERN_MAPPING.len()]);
        Self { position }
    }

    fn next_bit(&mut self) -> bool {
        // the interpreter wrapped at 255 not 256 bits
        if self.position >= 255 {
            self.position = 0;
        }
        let byte = TEXTURE_DATA[(self.position / 8) as usize];
        let bit = byte & (0x80 >> (self.position % 8)) != 0;
        self.position += 1;
        bit
    }
}

/// Renders an SCI0 vector picture into all three planes of the picture port
pub fn draw_picture(screen: &mut GfxScreen, resource: &Resource, clear: bool) {
    if clear {
        screen.fill_rect(Rect::port().port_to_screen(), MASK_VISUAL | MASK_PRIORITY | MASK_CONTROL, WHITE, 0, 0);
    }

    let mut data = Deserializer::new(resource);
    let mut canvas = Canvas {
        screen,
        pen: Pen {
            mask: MASK_VISUAL,
            visual: DitheredColour::from_ega(0, 0),
            priority: 0,
            control: 0,
        },
    };

    let mut palette = [DitheredColour::default_palette(); 4];

    let mut pattern_brush = PatternBrush {
        size: 0,
        shape: BrushShape::Circle,
        use_texture: false,
    };

    loop {
        let Some(command) = data.read_command() else {
            log::warn!("Unknown picture command at {:x} in pic {}", data.index - 1, resource.number);
            return;
        };
        match command {
            PictureCommand::SetVisualColour => {
                let (palette_num, palette_idx) = data.read_palette_entry();
                canvas.pen.visual = palette[palette_num][palette_idx];
                canvas.pen.mask |= MASK_VISUAL;
            }
            PictureCommand::DisableVisual => {
                canvas.pen.mask &= !MASK_VISUAL;
            }
            PictureCommand::SetPriorityColour => {
                canvas.pen.priority = data.read_byte() & 0xf;
                canvas.pen.mask |= MASK_PRIORITY;
            }
            PictureCommand::DisablePriority => {
                canvas.pen.mask &= !MASK_PRIORITY;
            }
            PictureCommand::SetControlColour => {
                canvas.pen.control = data.read_byte() & 0xf;
                canvas.pen.mask |= MASK_CONTROL;
            }
            PictureCommand::DisableControl => {
                canvas.pen.mask &= !MASK_CONTROL;
            }
            PictureCommand::DrawAbsoluteLines => canvas.draw_lines(&mut data, Step::Absolute),
            PictureCommand::DrawRelativeLines => canvas.draw_lines(&mut data, Step::Relative),
            PictureCommand::DrawShortRelativeLines => canvas.draw_lines(&mut data, Step::ShortRelative),
            PictureCommand::DrawAbsolutePatterns => canvas.draw_patterns(&mut data, &pattern_brush, Step::Absolute),
            PictureCommand::DrawRelativePatterns => canvas.draw_patterns(&mut data, &pattern_brush, Step::Relative),
            PictureCommand::DrawShortRelativePatterns => {
                canvas.draw_patterns(&mut data, &pattern_brush, Step::ShortRelative)
            }
            PictureCommand::FloodFill => {
                while !data.next_is_command() {
                    let p = data.read_coordinates();
                    canvas.flood_fill(p.x, p.y);
                }
            }
            PictureCommand::SetPattern => pattern_brush = data.read_pattern_brush(),
            PictureCommand::ExtendedCommand => match data.read_extended_command() {
                Some(ExtendedCommand::SetPaletteEntry) => {
                    while !data.next_is_command() {
                        let (palette_num, palette_idx) = data.read_palette_entry();
                        palette[palette_num][palette_idx] = data.read_colour_pair();
                    }
                }
                Some(ExtendedCommand::SetPalette) => {
                    let palette_num = (data.read_byte() as usize) % 4;
                    for entry in &mut palette[palette_num] {
                        *entry = data.read_colour_pair();
                    }
                }
                // monochrome displays are not supported
                Some(ExtendedCommand::SetMonoPalette) => data.skip(PALETTE_SIZE + 1),
                Some(ExtendedCommand::SetVisualMono) | Some(ExtendedCommand::SetDirectMonoVisual) => {
                    data.skip(1)
                }
                Some(ExtendedCommand::DisableVisualMono)
                | Some(ExtendedCommand::DisableDirectMonoVisual) => {}
                None => {
                    log::warn!("Unknown extended picture command in pic {}", resource.number);
                    return;
                }
            },
            PictureCommand::Finish => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{graphics::NullDisplay, resource::ResourceType};

    fn pic(data: Vec<u8>) -> Resource {
        Resource {
            resource_type: ResourceType::Pic,
            number: 1,
            data,
        }
    }

    fn screen() -> GfxScreen {
        GfxScreen::new(Box::<NullDisplay>::default())
    }

    #[test]
    fn lines_draw_into_enabled_planes() {
        let mut screen = screen();
        // visual colour 4, priority 7, absolute line (0,0) -> (5,0)
        let data = vec![0xf0, 4, 0xf2, 7, 0xf6, 0x00, 0, 0, 0x00, 5, 0, 0xff];
        draw_picture(&mut screen, &pic(data), true);

        assert_eq!(screen.get_visual(3, PORT_TOP), 4);
        assert_eq!(screen.get_priority(3, PORT_TOP), 7);
        assert_eq!(screen.get_control(3, PORT_TOP), 0);
        assert_eq!(screen.get_visual(3, PORT_TOP + 1), WHITE);
    }

    #[test]
    fn dithered_colours_alternate() {
        let mut screen = screen();
        // palette entry 17 is black/blue
        let data = vec![0xf0, 17, 0xf6, 0x00, 0, 0, 0x00, 3, 0, 0xff];
        draw_picture(&mut screen, &pic(data), true);
        assert_eq!(screen.get_visual(0, PORT_TOP), 0);
        assert_eq!(screen.get_visual(1, PORT_TOP), 1);
    }

    #[test]
    fn fill_stops_at_drawn_lines() {
        let mut screen = screen();
        // box outline then fill inside with control colour only
        let data = vec![
            0xf1, 0xfb, 3, // control only, colour 3
            0xf6, 0x00, 10, 10, 0x00, 20, 10, 0x00, 20, 20, 0x00, 10, 20, 0x00, 10, 10,
            0xf8, 0x00, 15, 15, 0xff,
        ];
        draw_picture(&mut screen, &pic(data), true);
        assert_eq!(screen.get_control(15, 15 + PORT_TOP), 3);
        assert_eq!(screen.get_control(5, 5 + PORT_TOP), 0);
        assert_eq!(screen.get_visual(15, 15 + PORT_TOP), WHITE);
    }

    #[test]
    fn truncated_picture_stops() {
        let mut screen = screen();
        draw_picture(&mut screen, &pic(vec![0xf0, 1, 0xf6, 0x00]), false);
    }

    #[test]
    fn texture_wraps_before_bit_256() {
        let mut bits = TextureBits::new(None);
        for _ in 0..255 {
            bits.next_bit();
        }
        assert_eq!(bits.position, 255);
        // first bit of the texture again
        assert!(!bits.next_bit());
        assert_eq!(bits.position, 1);
    }
}
