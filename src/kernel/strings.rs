use std::cmp::Ordering;

use log::{debug, info, warn};

use super::KernelArgs;
use crate::{
    error::{VmError, VmResult},
    heap::Register,
    pmachine::PMachine,
    resource::ResourceType,
};

/// Numbers below this stand for text resources rather than heap strings
const MAX_TEXT_RESOURCE: u16 = 1000;

impl<'a> PMachine<'a> {
    pub(crate) fn text_string(&self, number: u16, index: u16) -> VmResult<Vec<u8>> {
        let text = self
            .resources
            .find_resource(ResourceType::Text, number)
            .ok_or(VmError::ResourceMissing(ResourceType::Text, number))?;
        match text.data.split(|&b| b == 0).nth(index as usize) {
            Some(s) => Ok(s.to_vec()),
            None => {
                warn!("Text {number} has no string {index}");
                Ok(Vec::new())
            }
        }
    }

    /// A heap string, or a (text resource, index) pair when `r` is a small number
    pub(crate) fn lookup_text(&self, r: Register, index: Register) -> VmResult<Vec<u8>> {
        if r.is_number() && r.to_u16() < MAX_TEXT_RESOURCE {
            self.text_string(r.to_u16(), index.to_u16())
        } else {
            self.heap.read_string(r)
        }
    }
}

pub(super) fn str_end(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let s = args.get(0);
    let len = pm.heap.read_string(s)?.len();
    Ok(s.offset_by(len as i16))
}

pub(super) fn str_cat(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (dest, src) = (args.get(0), args.get(1));
    let mut s = pm.heap.read_string(dest)?;
    s.extend(pm.heap.read_string(src)?);
    pm.heap.write_string(dest, &s)?;
    Ok(dest)
}

pub(super) fn str_cmp(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (s1, s2) = (pm.heap.read_string(args.get(0))?, pm.heap.read_string(args.get(1))?);

    let ord = match args.opt(2) {
        Some(n) => {
            let n = n.to_i16().max(0) as usize;
            s1.iter().take(n).cmp(s2.iter().take(n))
        }
        None => s1.cmp(&s2),
    };
    debug!(
        "Kernel> StrCmp {}, {}",
        String::from_utf8_lossy(&s1),
        String::from_utf8_lossy(&s2)
    );
    Ok(Register::value(match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

pub(super) fn str_len(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let len = pm.heap.read_string(args.get(0))?.len();
    Ok(Register::value(len as i16))
}

/// StrCpy(dest, src [, length]). A positive length copies at most that many
/// characters, a negative one copies that many raw bytes.
pub(super) fn str_cpy(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (dest, src) = (args.get(0), args.get(1));
    match args.opt(2).map(|r| r.to_i16()) {
        Some(length) if length < 0 => {
            for i in 0..(-(length as i32)) as usize {
                let b = pm.heap.read_byte(src, i)?;
                pm.heap.write_byte(dest, i, b)?;
            }
        }
        Some(length) => {
            let s = pm.heap.read_string(src)?;
            let n = length as usize;
            if s.len() < n {
                pm.heap.write_string(dest, &s)?;
            } else {
                for (i, &b) in s[..n].iter().enumerate() {
                    pm.heap.write_byte(dest, i, b)?;
                }
            }
        }
        None => {
            let s = pm.heap.read_string(src)?;
            pm.heap.write_string(dest, &s)?;
        }
    }
    Ok(dest)
}

/// StrAt(string, index [, value]): the byte at index, replaced by value if given
pub(super) fn str_at(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (s, index) = (args.get(0), args.u16(1) as usize);
    let old = pm.heap.read_byte(s, index)?;
    if let Some(value) = args.opt(2) {
        pm.heap.write_byte(s, index, value.to_u16() as u8)?;
    }
    Ok(Register::value(old as i16))
}

pub(super) fn get_far_text(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (number, index, dest) = (args.u16(0), args.u16(1), args.get(2));
    let text = pm.text_string(number, index)?;
    info!("Kernel> GetFarText {}.{}: {}", number, index, String::from_utf8_lossy(&text));
    pm.heap.write_string(dest, &text)?;
    Ok(dest)
}

pub(super) fn read_number(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let s = pm.heap.read_string(args.get(0))?;
    Ok(Register::value(parse_number(&s)))
}

/// Decimal, or hex after a '$'. Stops at the first character that is not a digit.
fn parse_number(s: &[u8]) -> i16 {
    let mut digits = s.iter().skip_while(|b| b.is_ascii_whitespace()).peekable();
    let (radix, negative) = match digits.peek() {
        Some(b'$') => {
            digits.next();
            (16, false)
        }
        Some(b'-') => {
            digits.next();
            (10, true)
        }
        _ => (10, false),
    };
    let mut value: i16 = 0;
    for &b in digits {
        let Some(d) = (b as char).to_digit(radix) else {
            break;
        };
        value = value.wrapping_mul(radix as i16).wrapping_add(d as i16);
    }
    if negative {
        value.wrapping_neg()
    } else {
        value
    }
}

pub(super) fn format(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let dest = args.get(0);
    let (template, first_param) = match args.get(1) {
        r if r.is_number() && r.to_u16() < MAX_TEXT_RESOURCE => (pm.text_string(r.to_u16(), args.u16(2))?, 3),
        r => (pm.heap.read_string(r)?, 2),
    };
    let out = format_string(pm, &template, args.rest(first_param))?;
    debug!("Kernel> Format {:?}", String::from_utf8_lossy(&out));
    pm.heap.write_string(dest, &out)?;
    Ok(dest)
}

#[derive(Default)]
struct FormatSpec {
    left_align: bool,
    zero_pad: bool,
    width: usize,
}

impl FormatSpec {
    fn pad(&self, out: &mut Vec<u8>, text: &[u8]) {
        let fill = self.width.saturating_sub(text.len());
        if self.left_align {
            out.extend(text);
            out.extend(std::iter::repeat(b' ').take(fill));
        } else if self.zero_pad && text.first() == Some(&b'-') {
            out.push(b'-');
            out.extend(std::iter::repeat(b'0').take(fill));
            out.extend(&text[1..]);
        } else {
            let c = if self.zero_pad { b'0' } else { b' ' };
            out.extend(std::iter::repeat(c).take(fill));
            out.extend(text);
        }
    }
}

fn format_string(pm: &PMachine<'_>, template: &[u8], params: &[Register]) -> VmResult<Vec<u8>> {
    let mut out = Vec::with_capacity(template.len());
    let mut params = params.iter().copied();
    let mut next_param = || params.next().unwrap_or_default();
    let mut chars = template.iter().copied().peekable();

    while let Some(c) = chars.next() {
        if c != b'%' {
            out.push(c);
            continue;
        }
        let mut spec = FormatSpec::default();
        while let Some(flag @ (b'-' | b'0')) = chars.peek().copied() {
            match flag {
                b'-' => spec.left_align = true,
                _ => spec.zero_pad = true,
            }
            chars.next();
        }
        while let Some(d) = chars.peek().and_then(|&b| (b as char).to_digit(10)) {
            spec.width = spec.width * 10 + d as usize;
            chars.next();
        }

        match chars.next() {
            Some(b'd') => spec.pad(&mut out, next_param().to_i16().to_string().as_bytes()),
            Some(b'u') => spec.pad(&mut out, next_param().to_u16().to_string().as_bytes()),
            Some(b'x') => spec.pad(&mut out, format!("{:x}", next_param().to_u16()).as_bytes()),
            Some(b'c') => spec.pad(&mut out, &[next_param().to_u16() as u8]),
            Some(b's') => {
                let r = next_param();
                // a number names a text resource and takes the string index from the next parameter
                let index = if r.is_number() { next_param() } else { Register::NULL };
                spec.pad(&mut out, &pm.lookup_text(r, index)?);
            }
            Some(b'%') => out.push(b'%'),
            Some(other) => {
                warn!("Unknown format conversion %{}", other as char);
                out.push(b'%');
                out.push(other);
            }
            None => out.push(b'%'),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;
    use crate::{
        config::EngineConfig,
        events::ScriptedEvents,
        graphics::NullDisplay,
        heap::tests::class_resources,
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

    fn text(pm: &mut PMachine<'_>, s: &str) -> Register {
        let mut buf = s.as_bytes().to_vec();
        buf.resize(64, 0);
        pm.heap.allocate_dynmem("test string", buf)
    }

    #[test_case(b"42", 42)]
    #[test_case(b"  -17abc", -17)]
    #[test_case(b"$1f", 31)]
    #[test_case(b"x", 0)]
    fn parses_numbers(s: &[u8], expected: i16) {
        assert_eq!(parse_number(s), expected);
    }

    #[test]
    fn formats_with_flags_and_widths() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources);
        let dest = text(&mut pm, "");
        let fmt = text(&mut pm, "%d apples, %-4s|%03x %c %u %5d%%");
        let word = text(&mut pm, "ab");
        let params = [
            dest,
            fmt,
            Register::value(-5),
            word,
            Register::value(0x1f),
            Register::value(b'A' as i16),
            Register::value(-1),
            Register::value(42),
        ];
        assert_eq!(pm.call_kernel("Format", &params), Ok(dest));
        assert_eq!(
            pm.heap.read_str(dest).unwrap(),
            "-5 apples, ab  |01f A 65535    42%"
        );
    }

    #[test]
    fn formats_from_text_resources() {
        let (mut resources, ..) = class_resources();
        resources.insert(ResourceType::Text, 5, b"zero\0Score: %d of %d\0".to_vec());
        let mut pm = machine(&resources);
        let dest = text(&mut pm, "");
        let params = [dest, Register::value(5), Register::value(1), Register::value(3), Register::value(10)];
        pm.call_kernel("Format", &params).unwrap();
        assert_eq!(pm.heap.read_str(dest).unwrap(), "Score: 3 of 10");

        pm.call_kernel("GetFarText", &[Register::value(5), Register::value(0), dest])
            .unwrap();
        assert_eq!(pm.heap.read_str(dest).unwrap(), "zero");
    }

    #[test]
    fn edits_strings_in_place() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources);
        let a = text(&mut pm, "abc");
        let b = text(&mut pm, "abd");
        assert_eq!(pm.call_kernel("StrCmp", &[a, b]), Ok(Register::value(-1)));
        assert_eq!(pm.call_kernel("StrCmp", &[a, b, Register::value(2)]), Ok(Register::value(0)));

        pm.call_kernel("StrCat", &[a, b]).unwrap();
        assert_eq!(pm.heap.read_str(a).unwrap(), "abcabd");
        assert_eq!(pm.call_kernel("StrLen", &[a]), Ok(Register::value(6)));
        assert_eq!(pm.call_kernel("StrEnd", &[a]), Ok(a.offset_by(6)));

        assert_eq!(pm.call_kernel("StrAt", &[a, Register::value(1), Register::value(b'X' as i16)]), Ok(Register::value(b'b' as i16)));
        pm.call_kernel("StrCpy", &[b, a, Register::value(2)]).unwrap();
        assert_eq!(pm.heap.read_str(b).unwrap(), "aXd");
        pm.call_kernel("StrCpy", &[b, a]).unwrap();
        assert_eq!(pm.heap.read_str(b).unwrap(), "aXcabd");
    }
}
