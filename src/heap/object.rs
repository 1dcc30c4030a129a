use crate::script::{ObjectDefinition, INFO_CLASS, INFO_CLONE};

use super::{Register, SegmentId};

const SPECIES: usize = 0;
const SUPER_CLASS: usize = 1;
const INFO: usize = 2;
pub(crate) const NAME: usize = 3;

/// An object, class or clone. Script-defined ones live in their script segment keyed by offset,
/// clones live in a clone table.
#[derive(Clone, Debug, PartialEq)]
pub struct Object {
    pub pos: Register,
    pub variables: Vec<Register>,
    /// Selector id of each variable slot, taken from the species class for plain instances
    pub variable_selectors: Vec<u16>,
    /// (selector, code offset) pairs defined directly on this object
    pub methods: Vec<(u16, u16)>,
    /// Segment holding the method code, and the locals those methods see
    pub script: SegmentId,
    pub locals: Option<SegmentId>,
    freed: bool,
}

impl Object {
    pub(crate) fn from_definition(
        def: &ObjectDefinition,
        script: SegmentId,
        locals: Option<SegmentId>,
        variable_selectors: Vec<u16>,
    ) -> Self {
        Self {
            pos: Register::new(script, def.offset),
            variables: def.variables.iter().map(|&v| Register::value(v as i16)).collect(),
            variable_selectors,
            methods: def.function_selectors.clone(),
            script,
            locals,
            freed: false,
        }
    }

    pub fn species(&self) -> u16 {
        self.variable(SPECIES).to_u16()
    }

    pub fn super_class(&self) -> u16 {
        self.variable(SUPER_CLASS).to_u16()
    }

    pub fn info(&self) -> u16 {
        self.variable(INFO).to_u16()
    }

    pub fn name_ref(&self) -> Register {
        self.variable(NAME)
    }

    pub fn is_class(&self) -> bool {
        self.info() & INFO_CLASS != 0
    }

    pub fn is_clone(&self) -> bool {
        self.info() & INFO_CLONE != 0
    }

    pub fn mark_as_clone(&mut self) {
        let info = (self.info() & !INFO_CLASS) | INFO_CLONE;
        self.set_variable(INFO, Register::value(info as i16));
    }

    pub fn set_super_class(&mut self, class: u16) {
        self.set_variable(SUPER_CLASS, Register::value(class as i16));
    }

    pub fn mark_as_freed(&mut self) {
        self.freed = true;
    }

    pub fn is_freed(&self) -> bool {
        self.freed
    }

    pub fn variable(&self, index: usize) -> Register {
        self.variables.get(index).copied().unwrap_or_default()
    }

    pub fn set_variable(&mut self, index: usize, value: Register) -> bool {
        match self.variables.get_mut(index) {
            Some(v) => {
                *v = value;
                true
            }
            None => false,
        }
    }

    pub fn locate_var_selector(&self, selector: u16) -> Option<usize> {
        self.variable_selectors
            .iter()
            .take(self.variables.len())
            .position(|&s| s == selector)
    }

    pub fn find_method(&self, selector: u16) -> Option<u16> {
        self.methods
            .iter()
            .find(|(s, _)| *s == selector)
            .map(|(_, offset)| *offset)
    }

    /// pToa and friends address properties by byte offset
    pub fn property_index(offset: u16) -> usize {
        offset as usize / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object() -> Object {
        let def = ObjectDefinition {
            offset: 0x20,
            info: INFO_CLASS,
            variables: vec![4, 0xffff, INFO_CLASS, 0, 9],
            variable_selectors: vec![0, 1, 2, 3, 17],
            function_selectors: vec![(40, 0x100)],
        };
        Object::from_definition(&def, 5, None, def.variable_selectors.clone())
    }

    #[test]
    fn reads_header_properties() {
        let obj = object();
        assert_eq!(obj.pos, Register::new(5, 0x20));
        assert_eq!(obj.species(), 4);
        assert_eq!(obj.super_class(), 0xffff);
        assert!(obj.is_class());
        assert_eq!(obj.locate_var_selector(17), Some(4));
        assert_eq!(obj.find_method(40), Some(0x100));
        assert_eq!(obj.find_method(17), None);
    }

    #[test]
    fn clone_marking_clears_class_bit() {
        let mut obj = object();
        obj.mark_as_clone();
        assert!(obj.is_clone());
        assert!(!obj.is_class());
        assert!(!obj.is_freed());
        obj.mark_as_freed();
        assert!(obj.is_freed());
    }
}
