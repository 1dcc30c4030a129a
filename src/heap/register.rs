use std::fmt;

pub type SegmentId = u16;

/// Segment 0 never holds memory: registers in it are plain 16 bit integers and (0, 0) is null.
pub const NUMBER_SEGMENT: SegmentId = 0;

/// A script-visible value: either an integer or a (segment, offset) reference into the heap.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register {
    pub segment: SegmentId,
    pub offset: u16,
}

impl Register {
    pub const NULL: Register = Register::new(NUMBER_SEGMENT, 0);

    pub const fn new(segment: SegmentId, offset: u16) -> Self {
        Self { segment, offset }
    }

    pub const fn value(v: i16) -> Self {
        Self::new(NUMBER_SEGMENT, v as u16)
    }

    pub const fn from_bool(b: bool) -> Self {
        Self::value(b as i16)
    }

    pub fn is_null(&self) -> bool {
        self.segment == NUMBER_SEGMENT && self.offset == 0
    }

    pub fn is_number(&self) -> bool {
        self.segment == NUMBER_SEGMENT
    }

    pub fn is_pointer(&self) -> bool {
        self.segment != NUMBER_SEGMENT
    }

    pub fn to_i16(&self) -> i16 {
        self.offset as i16
    }

    pub fn to_u16(&self) -> u16 {
        self.offset
    }

    /// Truthiness as seen by bt/bnt: any reference is true
    pub fn is_zero_or_null(&self) -> bool {
        self.is_null()
    }

    pub fn add(&mut self, inc: i16) {
        self.offset = self.offset.wrapping_add(inc as u16);
    }

    pub fn offset_by(self, inc: i16) -> Self {
        let mut r = self;
        r.add(inc);
        r
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.segment, self.offset)
    }
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_number() {
            write!(f, "{}", self.to_i16())
        } else {
            write!(f, "{self}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_zero_in_number_segment() {
        assert!(Register::NULL.is_null());
        assert!(Register::value(0).is_null());
        assert!(!Register::new(2, 0).is_null());
        assert!(!Register::new(2, 0).is_zero_or_null());
    }

    #[test]
    fn add_wraps_offset() {
        let mut r = Register::value(-1);
        r.add(2);
        assert_eq!(r.to_i16(), 1);
        assert_eq!(Register::new(4, 10).offset_by(-2), Register::new(4, 8));
    }

    #[test]
    fn debug_shows_numbers_as_numbers() {
        assert_eq!(format!("{:?}", Register::value(-5)), "-5");
        assert_eq!(format!("{:?}", Register::new(1, 2)), "0001:0002");
    }
}
