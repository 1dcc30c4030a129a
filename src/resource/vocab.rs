use log::debug;

use super::{read_u16, Resource};

pub const VOCAB_CLASS_SCRIPTS: u16 = 996;
pub const VOCAB_SELECTOR_NAMES: u16 = 997;
pub const VOCAB_OPCODE_NAMES: u16 = 998;
pub const VOCAB_KERNEL_NAMES: u16 = 999;

fn counted_string(data: &[u8], offset: usize) -> Option<String> {
    let len = read_u16(data, offset)? as usize;
    let bytes = data.get(offset + 2..offset + 2 + len)?;
    Some(String::from_utf8_lossy(bytes).into_owned())
}

fn string_table(data: &[u8], count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            read_u16(data, i * 2 + 2)
                .and_then(|offset| counted_string(data, offset as usize))
                .unwrap_or_default()
        })
        .collect()
}

pub fn selector_names(resource: &Resource) -> Vec<String> {
    let data = resource.data.as_slice();
    // Note off by one error in count
    let count = read_u16(data, 0).map_or(0, |c| c as usize + 1);
    let names = string_table(data, count);
    debug!("Loaded {} selector names", names.len());
    names
}

pub fn kernel_names(resource: &Resource) -> Vec<String> {
    let data = resource.data.as_slice();
    let count = read_u16(data, 0).unwrap_or(0) as usize;
    string_table(data, count)
}

pub fn opcode_names(resource: &Resource) -> Vec<String> {
    let data = resource.data.as_slice();
    let count = read_u16(data, 0).unwrap_or(0) as usize;
    (0..count)
        .map(|i| {
            read_u16(data, i * 2 + 2)
                .and_then(|offset| {
                    let offset = offset as usize;
                    let len = read_u16(data, offset)?.checked_sub(2)? as usize;
                    let bytes = data.get(offset + 4..offset + 4 + len)?;
                    Some(String::from_utf8_lossy(bytes).into_owned())
                })
                .unwrap_or_default()
        })
        .collect()
}

/// Script number of every class, indexed by class number
pub fn class_scripts(resource: &Resource) -> Vec<u16> {
    resource
        .data
        .chunks_exact(4)
        .map(|c| u16::from_le_bytes([c[2], c[3]]))
        .collect()
}

/// Builds a counted string table in the layout of vocab 997/999
pub fn encode_string_table(names: &[&str], count_adjust: usize) -> Vec<u8> {
    let mut data = ((names.len() - count_adjust) as u16).to_le_bytes().to_vec();
    let mut offset = 2 + names.len() * 2;
    let mut strings = Vec::new();
    for name in names {
        data.extend((offset as u16).to_le_bytes());
        strings.extend((name.len() as u16).to_le_bytes());
        strings.extend(name.as_bytes());
        offset += 2 + name.len();
    }
    data.extend(strings);
    data
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::resource::ResourceType;

    fn vocab(number: u16, data: Vec<u8>) -> Resource {
        Resource {
            resource_type: ResourceType::Vocab,
            number,
            data,
        }
    }

    #[test]
    fn selector_table_count_is_one_short() {
        let data = encode_string_table(&["species", "superClass", "-info-"], 1);
        assert_eq!(
            selector_names(&vocab(VOCAB_SELECTOR_NAMES, data)),
            vec!["species", "superClass", "-info-"]
        );
    }

    #[test]
    fn kernel_table() {
        let data = encode_string_table(&["Load", "UnLoad"], 0);
        assert_eq!(kernel_names(&vocab(VOCAB_KERNEL_NAMES, data)), vec!["Load", "UnLoad"]);
    }

    #[test]
    fn class_table() {
        let data = vec![0, 0, 10, 0, 0, 0, 255, 0];
        assert_eq!(class_scripts(&vocab(VOCAB_CLASS_SCRIPTS, data)), vec![10, 255]);
    }
}
