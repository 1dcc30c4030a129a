use elsa::FrozenMap;
use log::debug;

use crate::{
    error::{VmError, VmResult},
    graphics::{GfxScreen, Rect, MASK_PRIORITY, MASK_VISUAL, SCREEN_HEIGHT, SCREEN_WIDTH},
    resource::{Resource, ResourceProvider, ResourceType},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Cel {
    pub width: u16,
    pub height: u16,
    pub displace_x: i8,
    pub displace_y: i8,
    pub clear_key: u8,
    pub bitmap: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    /// Index into the view's cel groups; mirrored loops share a group with their original
    cels: usize,
    pub mirrored: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub number: u16,
    loops: Vec<Loop>,
    cel_groups: Vec<Vec<Cel>>,
}

fn read_u16(data: &[u8], idx: usize) -> Option<u16> {
    Some(u16::from_le_bytes(data.get(idx..idx + 2)?.try_into().ok()?))
}

impl View {
    pub fn load(resource: &Resource, vga: bool) -> VmResult<View> {
        let parsed = if vga {
            load_vga(&resource.data)
        } else {
            load_ega(&resource.data)
        };
        let (loops, cel_groups) = parsed.ok_or_else(|| {
            VmError::InvalidResource(ResourceType::View, resource.number, "truncated view".into())
        })?;
        debug!("View {}: {} loops", resource.number, loops.len());
        Ok(View {
            number: resource.number,
            loops,
            cel_groups,
        })
    }

    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    pub fn cel_count(&self, loop_no: usize) -> usize {
        self.loops
            .get(loop_no)
            .and_then(|l| self.cel_groups.get(l.cels))
            .map_or(0, |cels| cels.len())
    }

    pub fn is_mirrored(&self, loop_no: usize) -> bool {
        self.loops.get(loop_no).is_some_and(|l| l.mirrored)
    }

    pub fn cel(&self, loop_no: usize, cel_no: usize) -> Option<&Cel> {
        self.cel_groups.get(self.loops.get(loop_no)?.cels)?.get(cel_no)
    }

    fn cel_or_err(&self, loop_no: usize, cel_no: usize) -> VmResult<&Cel> {
        self.cel(loop_no, cel_no).ok_or_else(|| {
            VmError::InvalidResource(
                ResourceType::View,
                self.number,
                format!("no cel {cel_no} in loop {loop_no}"),
            )
        })
    }

    /// Where a cel lands when its base point is at (x, y) raised by z
    pub fn cel_rect(&self, loop_no: usize, cel_no: usize, x: i16, y: i16, z: i16) -> VmResult<Rect> {
        let cel = self.cel_or_err(loop_no, cel_no)?;
        let (width, height) = (cel.width as i32, cel.height as i32);
        let left = x as i32 + cel.displace_x as i32 - (width >> 1);
        let bottom = y as i32 + cel.displace_y as i32 - z as i32 + 1;
        Ok(Rect::saturating(left, bottom - height, left + width, bottom))
    }

    /// As `cel_rect` with displacement and size multiplied by scale / 128
    pub fn cel_scaled_rect(
        &self,
        loop_no: usize,
        cel_no: usize,
        x: i16,
        y: i16,
        z: i16,
        scale_x: i16,
        scale_y: i16,
    ) -> VmResult<Rect> {
        let cel = self.cel_or_err(loop_no, cel_no)?;
        let scale = |v: i32, s: i16| (v * s as i32) >> 7;
        let displace_x = scale(cel.displace_x as i32, scale_x);
        let displace_y = scale(cel.displace_y as i32, scale_y);
        let width = scale(cel.width as i32, scale_x).clamp(0, SCREEN_WIDTH as i32);
        let height = scale(cel.height as i32, scale_y).clamp(0, SCREEN_HEIGHT as i32);

        let left = x as i32 + displace_x - (width >> 1);
        let bottom = y as i32 + displace_y - z as i32 + 1;
        Ok(Rect::saturating(left, bottom - height, left + width, bottom))
    }

    /// Draws a cel into `rect` (screen coordinates) wherever it is not transparent and
    /// `priority` is at least the priority already on screen. A rect of a different size
    /// than the cel scales it.
    pub fn draw(
        &self,
        screen: &mut GfxScreen,
        loop_no: usize,
        cel_no: usize,
        rect: Rect,
        clip: Rect,
        priority: u8,
    ) -> VmResult<()> {
        let cel = self.cel_or_err(loop_no, cel_no)?;
        let mirrored = self.is_mirrored(loop_no);
        let (width, height) = (rect.width() as i32, rect.height() as i32);
        if width <= 0 || height <= 0 {
            return Ok(());
        }
        let area = rect.clip(&clip).clip(&Rect::screen());

        for y in area.top..area.bottom {
            let src_y = ((y - rect.top) as i32 * cel.height as i32 / height) as usize;
            for x in area.left..area.right {
                let mut src_x = ((x - rect.left) as i32 * cel.width as i32 / width) as usize;
                if mirrored {
                    src_x = cel.width as usize - 1 - src_x;
                }
                let Some(&colour) = cel.bitmap.get(src_y * cel.width as usize + src_x) else {
                    continue;
                };
                if colour != cel.clear_key && priority >= screen.get_priority(x, y) {
                    screen.put_pixel(x, y, MASK_VISUAL | MASK_PRIORITY, colour, priority, 0);
                }
            }
        }
        Ok(())
    }
}

type Parsed = (Vec<Loop>, Vec<Vec<Cel>>);

fn load_loops<F>(data: &[u8], num_loops: usize, mirror_mask: u16, loop_table: usize, mut parse_cel: F) -> Option<Parsed>
where
    F: FnMut(usize) -> Option<Cel>,
{
    let mut loops = Vec::with_capacity(num_loops);
    let mut groups: Vec<(usize, Vec<Cel>)> = Vec::new();

    for l in 0..num_loops {
        let loop_offset = read_u16(data, loop_table + l * 2)? as usize;
        let cels = match groups.iter().position(|(offset, _)| *offset == loop_offset) {
            Some(existing) => existing,
            None => {
                let num_cels = read_u16(data, loop_offset)? as usize;
                let cels = (0..num_cels)
                    .map(|c| parse_cel(read_u16(data, loop_offset + 4 + c * 2)? as usize))
                    .collect::<Option<Vec<_>>>()?;
                groups.push((loop_offset, cels));
                groups.len() - 1
            }
        };
        loops.push(Loop {
            cels,
            mirrored: mirror_mask & (1 << l) != 0,
        });
    }

    Some((loops, groups.into_iter().map(|(_, cels)| cels).collect()))
}

fn cel_header(data: &[u8], cel_offset: usize) -> Option<(u16, u16, i8, i8, u8)> {
    Some((
        read_u16(data, cel_offset)?,
        read_u16(data, cel_offset + 2)?,
        *data.get(cel_offset + 4)? as i8,
        *data.get(cel_offset + 5)? as i8,
        *data.get(cel_offset + 6)?,
    ))
}

fn load_ega(data: &[u8]) -> Option<Parsed> {
    let num_loops = read_u16(data, 0)? as usize;
    let mirror_mask = read_u16(data, 2)?;

    load_loops(data, num_loops, mirror_mask, 8, |cel_offset| {
        let (width, height, displace_x, displace_y, clear_key) = cel_header(data, cel_offset)?;
        let pixels = width as usize * height as usize;

        // RLE: repeat count in the high nibble, colour in the low
        let mut bitmap = Vec::with_capacity(pixels);
        let mut offset = cel_offset + 7;
        while bitmap.len() < pixels {
            let b = *data.get(offset)?;
            let (rpt, colour) = ((b >> 4) as usize, b & 0xF);
            bitmap.extend(std::iter::repeat(colour).take(rpt.min(pixels - bitmap.len())));
            offset += 1;
        }

        Some(Cel {
            width,
            height,
            displace_x,
            displace_y,
            clear_key,
            bitmap,
        })
    })
}

fn load_vga(data: &[u8]) -> Option<Parsed> {
    let num_loops = *data.first()? as usize;
    let mirror_mask = read_u16(data, 2)?;

    load_loops(data, num_loops, mirror_mask, 8, |cel_offset| {
        let (width, height, displace_x, displace_y, clear_key) = cel_header(data, cel_offset)?;
        let pixels = width as usize * height as usize;

        let mut bitmap = Vec::with_capacity(pixels);
        let mut offset = cel_offset + 8;
        while bitmap.len() < pixels {
            let control = *data.get(offset)?;
            offset += 1;
            let run = ((control & 0x3f) as usize).min(pixels - bitmap.len());
            match control & 0xc0 {
                0x00 | 0x40 => {
                    let run = if control & 0x40 != 0 {
                        (run + 64).min(pixels - bitmap.len())
                    } else {
                        run
                    };
                    bitmap.extend_from_slice(data.get(offset..offset + run)?);
                    offset += run;
                }
                0x80 => {
                    let colour = *data.get(offset)?;
                    offset += 1;
                    bitmap.extend(std::iter::repeat(colour).take(run));
                }
                _ => bitmap.extend(std::iter::repeat(clear_key).take(run)),
            }
        }

        Some(Cel {
            width,
            height,
            displace_x,
            displace_y,
            clear_key,
            bitmap,
        })
    })
}

#[derive(Default)]
pub struct ViewCache {
    views: FrozenMap<u16, Box<View>>,
}

impl ViewCache {
    pub fn get(&self, resources: &dyn ResourceProvider, number: u16, vga: bool) -> VmResult<&View> {
        if let Some(view) = self.views.get(&number) {
            return Ok(view);
        }
        let resource = resources
            .find_resource(ResourceType::View, number)
            .ok_or(VmError::ResourceMissing(ResourceType::View, number))?;
        let view = View::load(resource, vga)?;
        Ok(self.views.insert(number, Box::new(view)))
    }

    pub fn flush(&mut self) {
        self.views = FrozenMap::default();
    }
}

/// Builds SCI0 view resources: one cel list per loop, cels given as (width, height, pixels).
pub fn build_ega_view(loops: &[Vec<(u16, u16, Vec<u8>)>], mirror_mask: u16) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend((loops.len() as u16).to_le_bytes());
    data.extend(mirror_mask.to_le_bytes());
    data.extend([0; 4]);
    let table = data.len();
    data.extend(std::iter::repeat(0).take(loops.len() * 2));

    for (l, cels) in loops.iter().enumerate() {
        let loop_offset = data.len() as u16;
        data[table + l * 2..table + l * 2 + 2].copy_from_slice(&loop_offset.to_le_bytes());
        data.extend((cels.len() as u16).to_le_bytes());
        data.extend([0; 2]);
        let cel_table = data.len();
        data.extend(std::iter::repeat(0).take(cels.len() * 2));

        for (c, (width, height, pixels)) in cels.iter().enumerate() {
            let cel_offset = data.len() as u16;
            data[cel_table + c * 2..cel_table + c * 2 + 2].copy_from_slice(&cel_offset.to_le_bytes());
            data.extend(width.to_le_bytes());
            data.extend(height.to_le_bytes());
            // no displacement, clear key 0xf
            data.extend([0, 0, 0xf]);
            data.extend(pixels.iter().map(|&p| 0x10 | (p & 0xf)));
        }
    }
    data
}
