use itertools::Itertools;
use log::debug;
use num_traits::FromPrimitive;

use crate::{
    config::SciVersion,
    error::{VmError, VmResult},
    resource::Resource,
};

#[derive(FromPrimitive, PartialEq, Debug, Copy, Clone)]
#[repr(u8)]
enum ScriptBlockType {
    Terminator,
    Object,
    Code,
    SynonymWordList,
    Said,
    Strings,
    Class,
    Exports,
    RelocationTable,
    PreloadTextFlag,
    LocalVariables,
}

pub(crate) const OBJECT_MAGIC: u16 = 0x1234;
/// Block header (type, size) plus magic, locals offset, function selector offset and variable count
pub(crate) const OBJECT_PROPERTY_OFFSET: usize = 12;

pub(crate) const INFO_CLONE: u16 = 0x0001;
pub const INFO_CLASS: u16 = 0x8000;

#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptData {
    pub number: u16,
    pub data: Vec<u8>,
    pub exports: Vec<u16>,
    pub synonyms: Vec<(u16, u16)>,
    pub objects: Vec<ObjectDefinition>,
    pub locals: Vec<u16>,
    pub relocations: Vec<u16>,
    pub preload_text: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ObjectDefinition {
    /// Script offset of the first property, which is where references to the object point
    pub offset: u16,
    pub info: u16,
    pub variables: Vec<u16>,
    /// Only classes carry the selector ids of their variables
    pub variable_selectors: Vec<u16>,
    pub function_selectors: Vec<(u16, u16)>,
}

impl ObjectDefinition {
    pub fn species(&self) -> u16 {
        self.variables.first().copied().unwrap_or(0)
    }

    pub fn super_class(&self) -> u16 {
        self.variables.get(1).copied().unwrap_or(NO_SUPER_CLASS)
    }

    pub fn is_class(&self) -> bool {
        self.info & INFO_CLASS != 0
    }
}

pub(crate) const NO_SUPER_CLASS: u16 = 0xffff;

struct ScriptBlock<'a> {
    block_type: ScriptBlockType,
    start: usize,
    block_data: &'a [u8],
}

pub(crate) fn read_u16(data: &[u8], idx: usize) -> Option<u16> {
    Some(u16::from_le_bytes(data.get(idx..idx + 2)?.try_into().ok()?))
}

impl ScriptData {
    pub(crate) fn load(resource: &Resource, version: SciVersion) -> VmResult<Self> {
        debug!("Loading script #{}", resource.number);

        let number = resource.number;
        let data = resource.data.as_slice();
        let invalid = |reason: &str| VmError::InvalidScript {
            script: number,
            reason: reason.to_string(),
        };

        // Early SCI0 scripts lead with their local variable count
        let (mut idx, early_locals) = if version == SciVersion::Sci0Early {
            (2, read_u16(data, 0).ok_or_else(|| invalid("truncated header"))?)
        } else {
            (0, 0)
        };

        let mut blocks: Vec<ScriptBlock> = Vec::new();
        loop {
            let raw_type = read_u16(data, idx).ok_or_else(|| invalid("missing terminator"))?;
            let block_type: ScriptBlockType = FromPrimitive::from_u16(raw_type)
                .ok_or_else(|| invalid(&format!("unknown block type {raw_type}")))?;
            if block_type == ScriptBlockType::Terminator {
                break;
            }

            let block_size = read_u16(data, idx + 2).ok_or_else(|| invalid("truncated block"))?
                as usize;
            if block_size < 4 || idx + block_size > data.len() {
                return Err(invalid(&format!("bad block size {block_size} at {idx:x}")));
            }
            let block_data = &data[idx + 4..idx + block_size];

            debug!("Found block type {:?} size {}", &block_type, block_size);
            blocks.push(ScriptBlock {
                block_type,
                start: idx,
                block_data,
            });
            idx += block_size; // includes header size
        }

        let mut script = ScriptData {
            number,
            data: data.to_vec(),
            locals: vec![0; early_locals as usize],
            ..Default::default()
        };

        for block in blocks {
            match block.block_type {
                ScriptBlockType::Object | ScriptBlockType::Class => {
                    let def = parse_object_definition(&block)
                        .ok_or_else(|| invalid(&format!("bad object at {:x}", block.start)))?;
                    debug!(
                        "{} at {:x} (species = {}, super class = {})",
                        if def.is_class() { "Class" } else { "Object" },
                        def.offset,
                        def.species(),
                        def.super_class()
                    );
                    script.objects.push(def);
                }
                ScriptBlockType::Code => {
                    debug!("Code at {:x}", block.start + 4);
                }
                ScriptBlockType::SynonymWordList => {
                    script.synonyms = block
                        .block_data
                        .chunks_exact(4)
                        .map(|c| (u16::from_le_bytes([c[0], c[1]]), u16::from_le_bytes([c[2], c[3]])))
                        .collect_vec();
                }
                ScriptBlockType::Said | ScriptBlockType::Strings => {}
                ScriptBlockType::Exports => {
                    script.exports = parse_word_table(block.block_data)
                        .ok_or_else(|| invalid("bad export table"))?;
                }
                ScriptBlockType::RelocationTable => {
                    script.relocations = parse_word_table(block.block_data)
                        .ok_or_else(|| invalid("bad relocation table"))?;
                    debug!("Relocation table: {} pointers", script.relocations.len());
                }
                ScriptBlockType::PreloadTextFlag => {
                    debug!("Pre-load text (text.{:0>3})", number);
                    script.preload_text = true;
                }
                ScriptBlockType::LocalVariables => {
                    script.locals = block
                        .block_data
                        .chunks_exact(2)
                        .map(|c| u16::from_le_bytes([c[0], c[1]]))
                        .collect_vec();
                    debug!("Local variables {}", script.locals.len());
                }
                ScriptBlockType::Terminator => {}
            }
        }

        Ok(script)
    }

    /// Script offset of the local variable block, used to relocate pointers into it
    pub(crate) fn locals_block_offset(&self) -> Option<usize> {
        let mut idx = 0;
        while let Some(block_type) = read_u16(&self.data, idx) {
            let size = read_u16(&self.data, idx + 2)? as usize;
            if block_type == ScriptBlockType::LocalVariables as u16 {
                return Some(idx + 4);
            }
            if block_type == 0 || size < 4 {
                return None;
            }
            idx += size;
        }
        None
    }
}

fn parse_object_definition(block: &ScriptBlock) -> Option<ObjectDefinition> {
    let data = block.block_data;
    if read_u16(data, 0)? != OBJECT_MAGIC {
        return None;
    }
    let num_variables = read_u16(data, 6)? as usize;
    let variables = (0..num_variables)
        .map(|i| read_u16(data, 8 + i * 2))
        .collect::<Option<Vec<_>>>()?;
    let info = variables.get(2).copied().unwrap_or(0);

    let mut idx = 8 + num_variables * 2;
    let variable_selectors = if block.block_type == ScriptBlockType::Class {
        let selectors = (0..num_variables)
            .map(|i| read_u16(data, idx + i * 2))
            .collect::<Option<Vec<_>>>()?;
        idx += num_variables * 2;
        selectors
    } else {
        Vec::new()
    };

    // method selectors, a zero word, then the matching code offsets
    let num_functions = read_u16(data, idx)? as usize;
    let func_table_offset = idx + 2;
    let code_table_offset = func_table_offset + num_functions * 2 + 2;
    let function_selectors = (0..num_functions)
        .map(|i| {
            Some((
                read_u16(data, func_table_offset + i * 2)?,
                read_u16(data, code_table_offset + i * 2)?,
            ))
        })
        .collect::<Option<Vec<_>>>()?;

    Some(ObjectDefinition {
        offset: (block.start + OBJECT_PROPERTY_OFFSET) as u16,
        info,
        variables,
        variable_selectors,
        function_selectors,
    })
}

fn parse_word_table(data: &[u8]) -> Option<Vec<u16>> {
    let count = read_u16(data, 0)? as usize;
    (1..=count).map(|i| read_u16(data, i * 2)).collect()
}

/// Builds SCI0 script resources in memory. Used by tests and tools that synthesise scripts.
#[derive(Default)]
pub struct ScriptBuilder {
    data: Vec<u8>,
    exports: Vec<u16>,
    relocations: Vec<u16>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> u16 {
        self.data.len() as u16
    }

    fn block(&mut self, block_type: ScriptBlockType, body: &[u8]) -> u16 {
        let start = self.offset();
        let size = (body.len() + 4) as u16;
        self.data.extend((block_type as u16).to_le_bytes());
        self.data.extend(size.to_le_bytes());
        self.data.extend(body);
        start
    }

    /// Adds a code block; returns the script offset of its first instruction
    pub fn code(&mut self, code: &[u8]) -> u16 {
        self.block(ScriptBlockType::Code, code) + 4
    }

    pub fn string(&mut self, s: &str) -> u16 {
        let mut body = s.as_bytes().to_vec();
        body.push(0);
        if body.len() % 2 == 1 {
            body.push(0);
        }
        self.block(ScriptBlockType::Strings, &body) + 4
    }

    pub fn locals(&mut self, values: &[u16]) -> u16 {
        let body = values.iter().flat_map(|v| v.to_le_bytes()).collect_vec();
        self.block(ScriptBlockType::LocalVariables, &body) + 4
    }

    /// Adds an object or class block; returns the object's reference offset.
    /// `variable_selectors` must be given for classes and is ignored for instances.
    pub fn object(
        &mut self,
        is_class: bool,
        variables: &[u16],
        variable_selectors: &[u16],
        methods: &[(u16, u16)],
    ) -> u16 {
        let mut body = Vec::new();
        body.extend(OBJECT_MAGIC.to_le_bytes());
        body.extend(0u16.to_le_bytes());
        let func_offset = 8 + variables.len() * if is_class { 4 } else { 2 };
        body.extend((func_offset as u16).to_le_bytes());
        body.extend((variables.len() as u16).to_le_bytes());
        body.extend(variables.iter().flat_map(|v| v.to_le_bytes()));
        if is_class {
            body.extend(variable_selectors.iter().flat_map(|v| v.to_le_bytes()));
        }
        body.extend((methods.len() as u16).to_le_bytes());
        body.extend(methods.iter().flat_map(|(s, _)| s.to_le_bytes()));
        body.extend(0u16.to_le_bytes());
        body.extend(methods.iter().flat_map(|(_, o)| o.to_le_bytes()));
        let block_type = if is_class {
            ScriptBlockType::Class
        } else {
            ScriptBlockType::Object
        };
        self.block(block_type, &body) + OBJECT_PROPERTY_OFFSET as u16
    }

    pub fn export(&mut self, offset: u16) {
        self.exports.push(offset);
    }

    pub fn relocate(&mut self, offset: u16) {
        self.relocations.push(offset);
    }

    pub fn build(mut self) -> Vec<u8> {
        for (block_type, table) in [
            (ScriptBlockType::Exports, std::mem::take(&mut self.exports)),
            (
                ScriptBlockType::RelocationTable,
                std::mem::take(&mut self.relocations),
            ),
        ] {
            if !table.is_empty() {
                let mut body = (table.len() as u16).to_le_bytes().to_vec();
                body.extend(table.iter().flat_map(|v| v.to_le_bytes()));
                self.block(block_type, &body);
            }
        }
        self.data.extend(0u16.to_le_bytes());
        self.data
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::resource::ResourceType;

    fn resource(number: u16, data: Vec<u8>) -> Resource {
        Resource {
            resource_type: ResourceType::Script,
            number,
            data,
        }
    }

    #[test]
    fn parses_class_and_instance_blocks() {
        let mut builder = ScriptBuilder::new();
        let code = builder.code(&[0x48]);
        let class = builder.object(true, &[7, 0xffff, INFO_CLASS, 0, 42], &[0, 1, 2, 3, 20], &[(30, code)]);
        let instance = builder.object(false, &[7, 7, 0, 0, 5], &[], &[]);
        builder.export(instance);
        let script = ScriptData::load(&resource(3, builder.build()), SciVersion::Sci0).unwrap();

        assert_eq!(script.exports, vec![instance]);
        assert_eq!(script.objects.len(), 2);
        let c = &script.objects[0];
        assert_eq!(c.offset, class);
        assert!(c.is_class());
        assert_eq!(c.species(), 7);
        assert_eq!(c.super_class(), NO_SUPER_CLASS);
        assert_eq!(c.variable_selectors, vec![0, 1, 2, 3, 20]);
        assert_eq!(c.function_selectors, vec![(30, code)]);
        assert_eq!(script.objects[1].variables, vec![7, 7, 0, 0, 5]);
        assert!(script.objects[1].variable_selectors.is_empty());
    }

    #[test]
    fn finds_locals_block() {
        let mut builder = ScriptBuilder::new();
        builder.code(&[0x48, 0x00]);
        let locals = builder.locals(&[1, 2, 3]);
        let script = ScriptData::load(&resource(0, builder.build()), SciVersion::Sci0).unwrap();
        assert_eq!(script.locals, vec![1, 2, 3]);
        assert_eq!(script.locals_block_offset(), Some(locals as usize));
    }

    #[test]
    fn rejects_unknown_block_type() {
        let data = vec![0x20, 0x00, 0x04, 0x00, 0x00, 0x00];
        let err = ScriptData::load(&resource(9, data), SciVersion::Sci0).unwrap_err();
        assert!(matches!(err, VmError::InvalidScript { script: 9, .. }));
    }

    #[test]
    fn rejects_truncated_block() {
        let data = vec![0x02, 0x00, 0x40, 0x00, 0x48];
        assert!(ScriptData::load(&resource(1, data), SciVersion::Sci0).is_err());
    }
}
