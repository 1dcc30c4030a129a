use std::collections::{BTreeMap, HashMap};

use log::{debug, info, warn};

use crate::{
    config::SciVersion,
    error::{VmError, VmResult},
    graphics::SavedBits,
    pmachine::ExecutionContext,
    resource::{ResourceProvider, ResourceType},
    script::{ScriptData, NO_SUPER_CLASS},
};

mod gc;
mod list;
mod object;
mod register;
mod table;

pub use gc::GcStats;
pub use list::{List, Node};
pub use object::Object;
pub use register::{Register, SegmentId, NUMBER_SEGMENT};
pub use table::Table;

/// A loaded script: its raw resource bytes double as the segment's addressable memory.
#[derive(Clone, Debug)]
pub struct Script {
    pub number: u16,
    pub buf: Vec<u8>,
    pub exports: Vec<u16>,
    pub synonyms: Vec<(u16, u16)>,
    pub objects: BTreeMap<u16, Object>,
    pub locals_segment: Option<SegmentId>,
    pub lockers: u16,
    pub marked_as_deleted: bool,
}

impl Script {
    pub fn export_address(&self, index: u16) -> Option<u16> {
        self.exports.get(index as usize).copied()
    }
}

#[derive(Clone, Debug)]
pub struct LocalVariables {
    pub script: u16,
    pub locals: Vec<Register>,
}

/// Operand stack plus the execution frames that index into it.
#[derive(Clone, Debug, Default)]
pub struct DataStack {
    pub values: Vec<Register>,
    pub frames: Vec<ExecutionContext>,
    pub capacity: usize,
}

#[derive(Clone, Debug)]
pub struct DynMem {
    pub description: String,
    pub buf: Vec<u8>,
}

#[derive(Clone, Debug)]
pub enum Segment {
    Script(Script),
    Locals(LocalVariables),
    Stack(DataStack),
    Clones(Table<Object>),
    Lists(Table<List>),
    Nodes(Table<Node>),
    Hunks(Table<SavedBits>),
    DynMem(DynMem),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SegmentType {
    Script,
    Locals,
    Stack,
    Clones,
    Lists,
    Nodes,
    Hunks,
    DynMem,
}

impl Segment {
    pub fn segment_type(&self) -> SegmentType {
        match self {
            Segment::Script(_) => SegmentType::Script,
            Segment::Locals(_) => SegmentType::Locals,
            Segment::Stack(_) => SegmentType::Stack,
            Segment::Clones(_) => SegmentType::Clones,
            Segment::Lists(_) => SegmentType::Lists,
            Segment::Nodes(_) => SegmentType::Nodes,
            Segment::Hunks(_) => SegmentType::Hunks,
            Segment::DynMem(_) => SegmentType::DynMem,
        }
    }
}

pub trait TableEntry: Sized {
    const KIND: SegmentType;
    fn table(segment: &Segment) -> Option<&Table<Self>>;
    fn table_mut(segment: &mut Segment) -> Option<&mut Table<Self>>;
    fn wrap(table: Table<Self>) -> Segment;
}

macro_rules! table_entry {
    ($t:ty, $variant:ident) => {
        impl TableEntry for $t {
            const KIND: SegmentType = SegmentType::$variant;
            fn table(segment: &Segment) -> Option<&Table<Self>> {
                match segment {
                    Segment::$variant(t) => Some(t),
                    _ => None,
                }
            }
            fn table_mut(segment: &mut Segment) -> Option<&mut Table<Self>> {
                match segment {
                    Segment::$variant(t) => Some(t),
                    _ => None,
                }
            }
            fn wrap(table: Table<Self>) -> Segment {
                Segment::$variant(table)
            }
        }
    };
}

table_entry!(Object, Clones);
table_entry!(List, Lists);
table_entry!(Node, Nodes);
table_entry!(SavedBits, Hunks);

#[derive(Clone, Debug, Default)]
pub struct Class {
    pub script: u16,
    pub reg: Register,
}

#[derive(Clone, Debug)]
pub struct SegManager {
    segments: Vec<Option<Segment>>,
    scripts: HashMap<u16, SegmentId>,
    tables: HashMap<SegmentType, SegmentId>,
    stack_segment: SegmentId,
    classes: Vec<Class>,
    version: SciVersion,
}

impl SegManager {
    pub fn new(class_scripts: &[u16], stack_size: usize, version: SciVersion) -> Self {
        let mut heap = SegManager {
            segments: vec![None],
            scripts: HashMap::new(),
            tables: HashMap::new(),
            stack_segment: NUMBER_SEGMENT,
            classes: class_scripts
                .iter()
                .map(|&script| Class {
                    script,
                    reg: Register::NULL,
                })
                .collect(),
            version,
        };
        heap.stack_segment = heap.allocate_segment(Segment::Stack(DataStack {
            values: Vec::with_capacity(stack_size),
            frames: Vec::new(),
            capacity: stack_size,
        }));
        heap
    }

    fn allocate_segment(&mut self, segment: Segment) -> SegmentId {
        if let Some(id) = self.segments.iter().skip(1).position(|s| s.is_none()) {
            let id = id + 1;
            self.segments[id] = Some(segment);
            id as SegmentId
        } else {
            self.segments.push(Some(segment));
            (self.segments.len() - 1) as SegmentId
        }
    }

    fn free_segment(&mut self, id: SegmentId) -> Option<Segment> {
        self.segments.get_mut(id as usize)?.take()
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id as usize)?.as_ref()
    }

    fn segment_mut(&mut self, id: SegmentId) -> Option<&mut Segment> {
        self.segments.get_mut(id as usize)?.as_mut()
    }

    pub fn segment_type(&self, id: SegmentId) -> Option<SegmentType> {
        self.segment(id).map(Segment::segment_type)
    }

    pub fn segment_ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| i as SegmentId)
    }

    pub fn version(&self) -> SciVersion {
        self.version
    }

    /// Allocates a slot in the current table segment for `T`, opening a new segment when full
    pub fn allocate<T: TableEntry>(&mut self, value: T) -> Register {
        let current = self.tables.get(&T::KIND).copied().filter(|&id| {
            self.segment(id)
                .and_then(T::table)
                .is_some_and(|t| !t.is_full())
        });
        let id = match current {
            Some(id) => id,
            None => {
                let id = self.allocate_segment(T::wrap(Table::default()));
                debug!("New {:?} segment {id}", T::KIND);
                self.tables.insert(T::KIND, id);
                id
            }
        };
        // the filter above guarantees the table exists and has room
        match self.segment_mut(id).and_then(T::table_mut) {
            Some(table) => Register::new(id, table.allocate(value)),
            None => Register::NULL,
        }
    }

    pub fn lookup<T: TableEntry>(&self, r: Register) -> VmResult<&T> {
        self.segment(r.segment)
            .and_then(T::table)
            .and_then(|t| t.get(r.offset))
            .ok_or(VmError::InvalidReference(r))
    }

    pub fn lookup_mut<T: TableEntry>(&mut self, r: Register) -> VmResult<&mut T> {
        self.segment_mut(r.segment)
            .and_then(T::table_mut)
            .and_then(|t| t.get_mut(r.offset))
            .ok_or(VmError::InvalidReference(r))
    }

    pub fn free<T: TableEntry>(&mut self, r: Register) -> VmResult<T> {
        self.segment_mut(r.segment)
            .and_then(T::table_mut)
            .and_then(|t| t.free(r.offset))
            .ok_or(VmError::InvalidReference(r))
    }

    pub fn is_valid<T: TableEntry>(&self, r: Register) -> bool {
        self.lookup::<T>(r).is_ok()
    }

    // Objects

    pub fn get_object(&self, r: Register) -> VmResult<&Object> {
        let obj = match self.segment(r.segment) {
            Some(Segment::Script(script)) => script.objects.get(&r.offset),
            Some(Segment::Clones(table)) => table.get(r.offset),
            _ => None,
        };
        obj.filter(|o| !o.is_freed())
            .ok_or(VmError::InvalidReference(r))
    }

    pub fn get_object_mut(&mut self, r: Register) -> VmResult<&mut Object> {
        let obj = match self.segment_mut(r.segment) {
            Some(Segment::Script(script)) => script.objects.get_mut(&r.offset),
            Some(Segment::Clones(table)) => table.get_mut(r.offset),
            _ => None,
        };
        obj.filter(|o| !o.is_freed())
            .ok_or(VmError::InvalidReference(r))
    }

    pub fn is_object(&self, r: Register) -> bool {
        self.get_object(r).is_ok()
    }

    pub fn object_name(&self, r: Register) -> String {
        let Ok(obj) = self.get_object(r) else {
            return format!("<invalid {r}>");
        };
        let name = obj.name_ref();
        let name = if name.is_number() {
            Register::new(obj.script, name.offset)
        } else {
            name
        };
        match self.read_string(name) {
            Ok(bytes) if !bytes.is_empty() => String::from_utf8_lossy(&bytes).into_owned(),
            _ => format!("{r}"),
        }
    }

    pub fn clone_object(&mut self, source: Register) -> VmResult<Register> {
        let parent = self.get_object(source)?;
        let mut clone = parent.clone();
        if parent.is_class() {
            clone.set_super_class(parent.species());
        }
        clone.mark_as_clone();
        let script = parent.script;

        let r = self.allocate(clone);
        self.get_object_mut(r)?.pos = r;
        self.increment_lockers(script);
        Ok(r)
    }

    // Classes

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    /// The class object for `class`; its script must already be instantiated
    pub fn class_address(&self, class: u16) -> VmResult<Register> {
        match self.classes.get(class as usize) {
            Some(c) if !c.reg.is_null() => Ok(c.reg),
            _ => Err(VmError::InvalidReference(Register::value(class as i16))),
        }
    }

    pub fn load_class(&mut self, resources: &dyn ResourceProvider, class: u16) -> VmResult<Register> {
        let Some(entry) = self.classes.get(class as usize) else {
            return Err(VmError::HeapCorruption(format!("class {class} is not in the class table")));
        };
        if entry.reg.is_null() {
            let script = entry.script;
            self.instantiate_script(resources, script)?;
        }
        self.class_address(class)
    }

    // Scripts

    pub fn script_segment(&self, number: u16) -> Option<SegmentId> {
        self.scripts.get(&number).copied()
    }

    pub fn get_script(&self, seg: SegmentId) -> VmResult<&Script> {
        match self.segment(seg) {
            Some(Segment::Script(s)) => Ok(s),
            _ => Err(VmError::InvalidReference(Register::new(seg, 0))),
        }
    }

    pub fn get_script_mut(&mut self, seg: SegmentId) -> VmResult<&mut Script> {
        match self.segment_mut(seg) {
            Some(Segment::Script(s)) => Ok(s),
            _ => Err(VmError::InvalidReference(Register::new(seg, 0))),
        }
    }

    pub fn increment_lockers(&mut self, seg: SegmentId) {
        if let Ok(script) = self.get_script_mut(seg) {
            script.lockers += 1;
        }
    }

    pub fn decrement_lockers(&mut self, seg: SegmentId) {
        if let Ok(script) = self.get_script_mut(seg) {
            script.lockers = script.lockers.saturating_sub(1);
        }
    }

    pub fn instantiate_script(
        &mut self,
        resources: &dyn ResourceProvider,
        number: u16,
    ) -> VmResult<SegmentId> {
        if let Some(seg) = self.script_segment(number) {
            let script = self.get_script_mut(seg)?;
            if script.marked_as_deleted {
                script.marked_as_deleted = false;
                script.lockers = 1;
            }
            return Ok(seg);
        }

        let resource = resources
            .find_resource(ResourceType::Script, number)
            .ok_or(VmError::ResourceMissing(ResourceType::Script, number))?;
        let data = ScriptData::load(resource, self.version)?;
        info!(
            "Instantiating script {number} ({} objects, {} locals)",
            data.objects.len(),
            data.locals.len()
        );

        let locals_segment = (!data.locals.is_empty() || number == 0).then(|| {
            self.allocate_segment(Segment::Locals(LocalVariables {
                script: number,
                locals: data.locals.iter().map(|&v| Register::value(v as i16)).collect(),
            }))
        });
        let seg = self.allocate_segment(Segment::Script(Script {
            number,
            buf: data.data.clone(),
            exports: data.exports.clone(),
            synonyms: data.synonyms.clone(),
            objects: BTreeMap::new(),
            locals_segment,
            lockers: 1,
            marked_as_deleted: false,
        }));
        self.scripts.insert(number, seg);

        for def in data.objects.iter().filter(|d| d.is_class()) {
            let species = def.species() as usize;
            if species >= self.classes.len() {
                self.classes.resize(species + 1, Class::default());
            }
            self.classes[species] = Class {
                script: number,
                reg: Register::new(seg, def.offset),
            };
        }

        let result = self.populate_script(resources, &data, seg, locals_segment);
        if result.is_err() {
            self.uninstantiate_script(number);
        }
        result.map(|_| seg)
    }

    fn populate_script(
        &mut self,
        resources: &dyn ResourceProvider,
        data: &ScriptData,
        seg: SegmentId,
        locals_segment: Option<SegmentId>,
    ) -> VmResult<()> {
        // Classes first: instances borrow the variable selectors of their species
        let (classes, instances): (Vec<_>, Vec<_>) =
            data.objects.iter().partition(|d| d.is_class());

        for def in &classes {
            let obj = Object::from_definition(def, seg, locals_segment, def.variable_selectors.clone());
            self.get_script_mut(seg)?.objects.insert(def.offset, obj);
        }

        for def in data.objects.iter() {
            if def.super_class() != NO_SUPER_CLASS {
                self.load_class(resources, def.super_class())?;
            }
        }

        for def in &instances {
            let class = self.load_class(resources, def.species())?;
            let selectors = self.get_object(class)?.variable_selectors.clone();
            let obj = Object::from_definition(def, seg, locals_segment, selectors);
            self.get_script_mut(seg)?.objects.insert(def.offset, obj);
        }

        self.relocate(data, seg, locals_segment)
    }

    fn relocate(
        &mut self,
        data: &ScriptData,
        seg: SegmentId,
        locals_segment: Option<SegmentId>,
    ) -> VmResult<()> {
        let locals_start = data.locals_block_offset();
        for &pointer in &data.relocations {
            let pointer = pointer as usize;
            if let (Some(start), Some(locals)) = (locals_start, locals_segment) {
                if pointer >= start && pointer < start + data.locals.len() * 2 {
                    if let Some(Segment::Locals(l)) = self.segment_mut(locals) {
                        l.locals[(pointer - start) / 2].segment = seg;
                    }
                    continue;
                }
            }

            let script = self.get_script_mut(seg)?;
            let target = script.objects.values_mut().find(|o| {
                let start = o.pos.offset as usize;
                pointer >= start && pointer < start + o.variables.len() * 2
            });
            match target {
                Some(obj) => {
                    let index = (pointer - obj.pos.offset as usize) / 2;
                    obj.variables[index].segment = seg;
                }
                None => debug!("Relocation {pointer:x} in script {} outside data", data.number),
            }
        }
        Ok(())
    }

    pub fn uninstantiate_script(&mut self, number: u16) {
        let Some(seg) = self.scripts.remove(&number) else {
            return;
        };
        info!("Uninstantiating script {number}");
        for class in self.classes.iter_mut().filter(|c| c.reg.segment == seg) {
            class.reg = Register::NULL;
        }
        if let Some(Segment::Script(script)) = self.free_segment(seg) {
            if let Some(locals) = script.locals_segment {
                self.free_segment(locals);
            }
        }
    }

    pub fn loaded_scripts(&self) -> impl Iterator<Item = (u16, SegmentId)> + '_ {
        self.scripts.iter().map(|(&n, &s)| (n, s))
    }

    // Variables and stack

    pub fn locals(&self, seg: SegmentId) -> VmResult<&[Register]> {
        match self.segment(seg) {
            Some(Segment::Locals(l)) => Ok(&l.locals),
            _ => Err(VmError::InvalidReference(Register::new(seg, 0))),
        }
    }

    pub fn locals_mut(&mut self, seg: SegmentId) -> VmResult<&mut Vec<Register>> {
        match self.segment_mut(seg) {
            Some(Segment::Locals(l)) => Ok(&mut l.locals),
            _ => Err(VmError::InvalidReference(Register::new(seg, 0))),
        }
    }

    /// Script 0's locals are the game's global variables
    pub fn globals_segment(&self) -> Option<SegmentId> {
        let seg = self.script_segment(0)?;
        self.get_script(seg).ok()?.locals_segment
    }

    pub fn stack_segment(&self) -> SegmentId {
        self.stack_segment
    }

    pub fn stack(&self) -> &DataStack {
        match self.segment(self.stack_segment) {
            Some(Segment::Stack(s)) => s,
            _ => unreachable!("stack segment is allocated at construction and never freed"),
        }
    }

    pub fn stack_mut(&mut self) -> &mut DataStack {
        match self.segments.get_mut(self.stack_segment as usize) {
            Some(Some(Segment::Stack(s))) => s,
            _ => unreachable!("stack segment is allocated at construction and never freed"),
        }
    }

    pub fn allocate_dynmem(&mut self, description: &str, buf: Vec<u8>) -> Register {
        let seg = self.allocate_segment(Segment::DynMem(DynMem {
            description: description.to_string(),
            buf,
        }));
        Register::new(seg, 0)
    }

    /// Releases a segment made by `allocate_dynmem`. Anything else is left alone.
    pub fn free_dynmem(&mut self, r: Register) -> bool {
        if r.offset != 0 || self.segment_type(r.segment) != Some(SegmentType::DynMem) {
            return false;
        }
        self.free_segment(r.segment).is_some()
    }

    // Byte access. Script and dynmem memory is raw bytes; stack and locals pack two bytes per slot.

    pub fn read_byte(&self, r: Register, index: usize) -> VmResult<u8> {
        let address = r.offset as usize + index;
        let invalid = || VmError::InvalidReference(r.offset_by(index as i16));
        match self.segment(r.segment) {
            Some(Segment::Script(s)) => s.buf.get(address).copied().ok_or_else(invalid),
            Some(Segment::DynMem(d)) => d.buf.get(address).copied().ok_or_else(invalid),
            Some(Segment::Locals(l)) => read_packed(&l.locals, address).ok_or_else(invalid),
            Some(Segment::Stack(s)) => read_packed(&s.values, address).ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    pub fn write_byte(&mut self, r: Register, index: usize, value: u8) -> VmResult<()> {
        let address = r.offset as usize + index;
        let invalid = VmError::InvalidReference(r.offset_by(index as i16));
        let slot = match self.segment_mut(r.segment) {
            Some(Segment::Script(s)) => s.buf.get_mut(address),
            Some(Segment::DynMem(d)) => d.buf.get_mut(address),
            Some(Segment::Locals(l)) => return write_packed(&mut l.locals, address, value).ok_or(invalid),
            Some(Segment::Stack(s)) => return write_packed(&mut s.values, address, value).ok_or(invalid),
            _ => None,
        };
        *slot.ok_or(invalid)? = value;
        Ok(())
    }

    /// Little endian, so a word written into stack or locals fills one slot
    pub fn write_word(&mut self, r: Register, index: usize, value: u16) -> VmResult<()> {
        let [lo, hi] = value.to_le_bytes();
        self.write_byte(r, index, lo)?;
        self.write_byte(r, index + 1, hi)
    }

    pub fn read_string(&self, r: Register) -> VmResult<Vec<u8>> {
        let mut s = Vec::new();
        loop {
            match self.read_byte(r, s.len())? {
                0 => return Ok(s),
                b => s.push(b),
            }
        }
    }

    pub fn read_str(&self, r: Register) -> VmResult<String> {
        Ok(String::from_utf8_lossy(&self.read_string(r)?).into_owned())
    }

    pub fn write_string(&mut self, r: Register, bytes: &[u8]) -> VmResult<()> {
        for (i, &b) in bytes.iter().enumerate() {
            self.write_byte(r, i, b)?;
        }
        self.write_byte(r, bytes.len(), 0)
    }

    pub fn warn_dangling(&self, r: Register, context: &str) {
        warn!("{context}: dangling reference {r}");
    }
}

fn read_packed(values: &[Register], address: usize) -> Option<u8> {
    let v = values.get(address / 2)?.offset;
    Some(if address % 2 == 0 { v as u8 } else { (v >> 8) as u8 })
}

fn write_packed(values: &mut [Register], address: usize, byte: u8) -> Option<()> {
    let slot = values.get_mut(address / 2)?;
    let v = slot.offset;
    slot.offset = if address % 2 == 0 {
        (v & 0xff00) | byte as u16
    } else {
        (v & 0x00ff) | ((byte as u16) << 8)
    };
    slot.segment = NUMBER_SEGMENT;
    Some(())
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        resource::ResourceManager,
        script::{ScriptBuilder, INFO_CLASS},
    };

    pub(crate) fn empty_heap() -> SegManager {
        SegManager::new(&[], 0x100, SciVersion::Sci0)
    }

    /// Script 0 holds class 0 (selectors 0..=4, 4 = "x") and an instance at export 0
    pub(crate) fn class_resources() -> (ResourceManager, u16, u16) {
        let mut builder = ScriptBuilder::new();
        builder.locals(&[0; 8]);
        let name = builder.string("Thing");
        let class = builder.object(true, &[0, 0xffff, INFO_CLASS, name, 10], &[0, 1, 2, 3, 4], &[]);
        builder.relocate(class + 6);
        let instance = builder.object(false, &[0, 0, 0, 0, 20], &[], &[]);
        builder.export(instance);
        let mut resources = ResourceManager::default();
        resources.insert(ResourceType::Script, 0, builder.build());
        (resources, class, instance)
    }

    #[test]
    fn allocate_reuses_freed_slots_and_rejects_dangling() {
        let mut heap = empty_heap();
        let a = heap.allocate(List::default());
        let b = heap.allocate(List::default());
        assert_eq!(a.segment, b.segment);
        assert_ne!(a.offset, b.offset);

        heap.free::<List>(a).unwrap();
        assert_eq!(heap.lookup::<List>(a), Err(VmError::InvalidReference(a)));
        // freed slot is handed out again
        assert_eq!(heap.allocate(List::default()), a);
    }

    #[test]
    fn lookup_of_wrong_kind_is_invalid() {
        let mut heap = empty_heap();
        let list = heap.allocate(List::default());
        assert!(heap.lookup::<Node>(list).is_err());
        assert!(heap.lookup::<List>(Register::new(200, 0)).is_err());
        assert!(heap.get_object(list).is_err());
    }

    #[test]
    fn instantiates_classes_and_instances() {
        let (resources, class, instance) = class_resources();
        let mut heap = SegManager::new(&[0], 0x100, SciVersion::Sci0);
        let seg = heap.instantiate_script(&resources, 0).unwrap();

        assert_eq!(heap.class_address(0), Ok(Register::new(seg, class)));
        let obj = heap.get_object(Register::new(seg, instance)).unwrap();
        assert_eq!(obj.variable_selectors, vec![0, 1, 2, 3, 4]);
        assert_eq!(obj.variable(4), Register::value(20));
        assert_eq!(heap.object_name(Register::new(seg, class)), "Thing");
        assert_eq!(heap.get_script(seg).unwrap().lockers, 1);
        assert_eq!(heap.locals(heap.globals_segment().unwrap()).unwrap().len(), 8);
    }

    #[test]
    fn missing_script_is_reported() {
        let resources = ResourceManager::default();
        let mut heap = empty_heap();
        assert_eq!(
            heap.instantiate_script(&resources, 12),
            Err(VmError::ResourceMissing(ResourceType::Script, 12))
        );
    }

    #[test]
    fn clones_lock_their_script_and_dangle_when_freed() {
        let (resources, class, _) = class_resources();
        let mut heap = SegManager::new(&[0], 0x100, SciVersion::Sci0);
        let seg = heap.instantiate_script(&resources, 0).unwrap();

        let clone = heap.clone_object(Register::new(seg, class)).unwrap();
        let obj = heap.get_object(clone).unwrap();
        assert!(obj.is_clone());
        assert_eq!(obj.super_class(), 0);
        assert_eq!(obj.pos, clone);
        assert_eq!(heap.get_script(seg).unwrap().lockers, 2);

        heap.get_object_mut(clone).unwrap().mark_as_freed();
        assert_eq!(heap.get_object(clone), Err(VmError::InvalidReference(clone)));
    }

    #[test]
    fn strings_pack_into_stack_slots() {
        let mut heap = empty_heap();
        heap.stack_mut().values.resize(4, Register::NULL);
        let buffer = Register::new(heap.stack_segment(), 2);
        heap.write_string(buffer, b"abc").unwrap();

        assert_eq!(heap.stack().values[1], Register::value(i16::from_le_bytes([b'a', b'b'])));
        assert_eq!(heap.read_string(buffer).unwrap(), b"abc".to_vec());
        assert_eq!(heap.read_str(buffer.offset_by(1)).unwrap(), "bc");
    }

    #[test]
    fn dynmem_strings() {
        let mut heap = empty_heap();
        let r = heap.allocate_dynmem("savedir", b"./\0".to_vec());
        assert_eq!(heap.read_str(r).unwrap(), "./");
        assert!(heap.write_string(r, b"too long").is_err());
    }
}
