use std::collections::HashMap;

use log::debug;

use crate::{
    error::{VmError, VmResult},
    heap::{Register, SegManager, SegmentId},
    resource::{vocab, Resource},
    script::NO_SUPER_CLASS,
};

pub const NO_SELECTOR: u16 = 0xffff;

/// What a selector resolves to on a given object.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SelectorLookup {
    /// Index into the object's variables
    Variable(usize),
    /// Code address: script segment and offset of the method's first instruction
    Method(Register),
    Absent,
}

impl SegManager {
    /// Variables are found on the object itself, methods by walking the superclass chain.
    pub fn lookup_selector(&self, object: Register, selector: u16) -> VmResult<SelectorLookup> {
        let obj = self.get_object(object)?;
        if let Some(index) = obj.locate_var_selector(selector) {
            return Ok(SelectorLookup::Variable(index));
        }

        let mut current = obj;
        // a well formed hierarchy is never deeper than the class table
        for _ in 0..=self.class_count() {
            if let Some(offset) = current.find_method(selector) {
                return Ok(SelectorLookup::Method(Register::new(current.script, offset)));
            }
            let super_class = current.super_class();
            if super_class == NO_SUPER_CLASS {
                break;
            }
            // instances and clones of a class name that class as their super class
            let next = self.class_address(super_class)?;
            if next == current.pos {
                break;
            }
            current = self.get_object(next)?;
        }
        Ok(SelectorLookup::Absent)
    }

    pub fn responds_to(&self, object: Register, selector: u16) -> bool {
        matches!(
            self.lookup_selector(object, selector),
            Ok(SelectorLookup::Variable(_) | SelectorLookup::Method(_))
        )
    }

    pub fn read_selector(&self, object: Register, selector: u16) -> VmResult<Register> {
        match self.lookup_selector(object, selector)? {
            SelectorLookup::Variable(index) => Ok(self.get_object(object)?.variable(index)),
            _ => Err(VmError::SelectorNotFound { object, selector }),
        }
    }

    pub fn write_selector(&mut self, object: Register, selector: u16, value: Register) -> VmResult<()> {
        match self.lookup_selector(object, selector)? {
            SelectorLookup::Variable(index) => {
                debug!("{object}.{selector} = {value:?}");
                self.get_object_mut(object)?.set_variable(index, value);
                Ok(())
            }
            _ => Err(VmError::SelectorNotFound { object, selector }),
        }
    }

    pub fn read_selector_i16(&self, object: Register, selector: u16, default: i16) -> i16 {
        self.read_selector(object, selector)
            .map_or(default, |r| r.to_i16())
    }

    /// The locals a method in `script` sees
    pub fn method_locals(&self, script: SegmentId) -> Option<SegmentId> {
        self.get_script(script).ok()?.locals_segment
    }
}

#[derive(Clone, Debug, Default)]
pub struct SelectorTable {
    names: Vec<String>,
    ids: HashMap<String, u16>,
}

impl SelectorTable {
    pub fn from_resource(resource: &Resource) -> Self {
        Self::from_names(vocab::selector_names(resource))
    }

    pub fn from_names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut ids = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            // first definition wins for duplicated names
            ids.entry(name.clone()).or_insert(i as u16);
        }
        Self { names, ids }
    }

    pub fn id(&self, name: &str) -> u16 {
        self.ids.get(name).copied().unwrap_or(NO_SELECTOR)
    }

    pub fn name(&self, id: u16) -> &str {
        self.names.get(id as usize).map_or("?", |s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

macro_rules! selector_cache {
    ($($field:ident => $name:literal),* $(,)?) => {
        /// Ids of the selectors the kernel reads and writes itself. Missing ones are `NO_SELECTOR`.
        #[derive(Clone, Debug)]
        pub struct SelectorCache {
            $(pub $field: u16,)*
        }

        impl SelectorCache {
            pub fn new(table: &SelectorTable) -> Self {
                Self {
                    $($field: table.id($name),)*
                }
            }
        }
    };
}

selector_cache! {
    x => "x",
    y => "y",
    z => "z",
    view => "view",
    loop_ => "loop",
    cel => "cel",
    priority => "priority",
    signal => "signal",
    under_bits => "underBits",
    ns_top => "nsTop",
    ns_left => "nsLeft",
    ns_bottom => "nsBottom",
    ns_right => "nsRight",
    ls_top => "lsTop",
    ls_left => "lsLeft",
    ls_bottom => "lsBottom",
    ls_right => "lsRight",
    br_top => "brTop",
    br_left => "brLeft",
    br_bottom => "brBottom",
    br_right => "brRight",
    illegal_bits => "illegalBits",
    x_step => "xStep",
    y_step => "yStep",
    move_speed => "moveSpeed",
    client => "client",
    dx => "dx",
    dy => "dy",
    b_move_cnt => "b-moveCnt",
    b_i1 => "b-i1",
    b_i2 => "b-i2",
    b_di => "b-di",
    b_x_axis => "b-xAxis",
    b_incr => "b-incr",
    x_last => "xLast",
    y_last => "yLast",
    completed => "completed",
    move_done => "moveDone",
    can_be_here => "canBeHere",
    cant_be_here => "cantBeHere",
    doit => "doit",
    delete => "delete",
    play => "play",
    replay => "replay",
    scale_signal => "scaleSignal",
    scale_x => "scaleX",
    scale_y => "scaleY",
    max_scale => "maxScale",
    vanishing_y => "vanishingY",
    elements => "elements",
    size => "size",
    mover => "mover",
    type_ => "type",
    message => "message",
    modifiers => "modifiers",
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::SciVersion,
        heap::tests::class_resources,
        resource::{ResourceManager, ResourceType},
        script::{ScriptBuilder, INFO_CLASS},
    };

    #[test]
    fn finds_variables_on_instances() {
        let (resources, _, instance) = class_resources();
        let mut heap = SegManager::new(&[0], 0x100, SciVersion::Sci0);
        let seg = heap.instantiate_script(&resources, 0).unwrap();
        let obj = Register::new(seg, instance);

        assert_eq!(heap.lookup_selector(obj, 4), Ok(SelectorLookup::Variable(4)));
        assert_eq!(heap.read_selector(obj, 4), Ok(Register::value(20)));
        heap.write_selector(obj, 4, Register::value(-3)).unwrap();
        assert_eq!(heap.read_selector_i16(obj, 4, 0), -3);
        assert_eq!(heap.lookup_selector(obj, 99), Ok(SelectorLookup::Absent));
        assert_eq!(
            heap.read_selector(obj, 99),
            Err(VmError::SelectorNotFound { object: obj, selector: 99 })
        );
    }

    #[test]
    fn methods_are_inherited_through_super_classes() {
        // class 0 defines method 10, class 1 derives from it and overrides 11
        let mut base = ScriptBuilder::new();
        let base_code = base.code(&[0x48]);
        base.object(true, &[0, 0xffff, INFO_CLASS, 0], &[0, 1, 2, 3], &[(10, base_code), (11, base_code)]);

        let mut derived = ScriptBuilder::new();
        let derived_code = derived.code(&[0x48]);
        derived.object(true, &[1, 0, INFO_CLASS, 0], &[0, 1, 2, 3], &[(11, derived_code)]);
        let instance = derived.object(false, &[1, 1, 0, 0], &[], &[]);

        let mut resources = ResourceManager::default();
        resources.insert(ResourceType::Script, 10, base.build());
        resources.insert(ResourceType::Script, 11, derived.build());

        let mut heap = SegManager::new(&[10, 11], 0x100, SciVersion::Sci0);
        let seg = heap.instantiate_script(&resources, 11).unwrap();
        let base_seg = heap.script_segment(10).unwrap();
        let obj = Register::new(seg, instance);

        assert_eq!(
            heap.lookup_selector(obj, 10),
            Ok(SelectorLookup::Method(Register::new(base_seg, base_code)))
        );
        assert_eq!(
            heap.lookup_selector(obj, 11),
            Ok(SelectorLookup::Method(Register::new(seg, derived_code)))
        );
        assert!(heap.responds_to(obj, 10));
        assert!(!heap.responds_to(obj, 12));
    }

    #[test]
    fn table_maps_names_both_ways() {
        let table = SelectorTable::from_names(["species", "superClass", "-info-", "x", "y"]);
        assert_eq!(table.id("x"), 3);
        assert_eq!(table.name(4), "y");
        assert_eq!(table.id("nope"), NO_SELECTOR);

        let cache = SelectorCache::new(&table);
        assert_eq!(cache.x, 3);
        assert_eq!(cache.signal, NO_SELECTOR);
    }
}
