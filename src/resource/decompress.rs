use std::io::Cursor;

use bitstream_io::{BigEndian, BitRead, BitReader};
use weezl::{decode::Decoder, BitOrder};

// SCI0 compression types
#[derive(FromPrimitive, PartialEq, Debug)]
pub(crate) enum CompressionType {
    None,
    LZW,
    Huffman,
}

/// SCI0 LZW: LSB first codes growing from 9 to 12 bits, 256 resets the table and 257 ends the stream
pub(crate) fn lzw_decode(compressed_data: &[u8]) -> Result<Vec<u8>, String> {
    Decoder::new(BitOrder::Lsb, 8)
        .decode(compressed_data)
        .map_err(|e| e.to_string())
}

enum HuffmanNode {
    Tree(Box<HuffmanNode>, Box<HuffmanNode>),
    Leaf(u8),
    Literal(),
}

fn build_huffman_node(node_data: &[u8], node_index: usize, depth: usize) -> Result<HuffmanNode, String> {
    // a node table of at most 256 entries cannot nest deeper than this
    if depth > 256 {
        return Err("Huffman tree is cyclic".into());
    }
    let offset = node_index * 2;
    let (Some(&value), Some(&siblings)) = (node_data.get(offset), node_data.get(offset + 1)) else {
        return Err(format!("Huffman node {node_index} out of range"));
    };
    match siblings {
        // Value
        0 => Ok(HuffmanNode::Leaf(value)),
        _ => {
            let left = (siblings >> 4) as usize;
            let right = (siblings & 0xF) as usize;
            Ok(HuffmanNode::Tree(
                Box::new(build_huffman_node(node_data, left + node_index, depth + 1)?),
                match right {
                    // Literal
                    0 => Box::new(HuffmanNode::Literal()),
                    // Node
                    _ => Box::new(build_huffman_node(node_data, right + node_index, depth + 1)?),
                },
            ))
        }
    }
}

pub(crate) fn huffman_decode(compressed_data: &[u8]) -> Result<Vec<u8>, String> {
    let (Some(&num_nodes), Some(&terminator)) = (compressed_data.first(), compressed_data.get(1)) else {
        return Err("missing Huffman header".into());
    };
    let num_nodes = num_nodes as usize;

    // Can't use a traditional Huffman encoding library as none seem to support reading a byte from compressed data when no encoding is present

    // Build tree
    let node_data = compressed_data
        .get(2..num_nodes * 2 + 2)
        .ok_or("truncated Huffman node table")?;
    let tree = build_huffman_node(node_data, 0, 0)?;

    let mut result: Vec<u8> = Vec::new();
    let mut reader = BitReader::endian(
        Cursor::new(&compressed_data[num_nodes * 2 + 2..]),
        BigEndian,
    );
    let eof = |_| "Huffman stream ended without terminator".to_string();

    let mut node = &tree;

    loop {
        node = match node {
            HuffmanNode::Leaf(value) => {
                result.push(*value);
                &tree
            }
            HuffmanNode::Literal() => {
                let literal: u8 = reader.read(8).map_err(eof)?;
                if literal == terminator {
                    return Ok(result);
                }
                result.push(literal);
                &tree
            }
            HuffmanNode::Tree(left, right) => {
                if reader.read_bit().map_err(eof)? {
                    right
                } else {
                    left
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn huffman_literals_and_leaves() {
        // node 0: tree with left = node 1 (leaf 'a'), right = literal
        let data = [
            2, 0x00, // two nodes, terminator 0
            0, 0x10, // node 0: left +1, right literal
            b'a', 0, // node 1: leaf
            // bits: 0 -> 'a', 1 + 'b' literal, 1 + terminator
            0b0_1_011000, 0b10_1_00000, 0b000_00000,
        ];
        assert_eq!(huffman_decode(&data).unwrap(), b"ab".to_vec());
    }

    #[test]
    fn huffman_rejects_truncated_input() {
        assert!(huffman_decode(&[4, 0, 0, 0x10]).is_err());
        assert!(huffman_decode(&[]).is_err());
    }

    #[test]
    fn lzw_round_trips_plain_codes() {
        let mut encoder = weezl::encode::Encoder::new(BitOrder::Lsb, 8);
        let packed = encoder.encode(b"sierra sierra sierra").unwrap();
        assert_eq!(lzw_decode(&packed).unwrap(), b"sierra sierra sierra".to_vec());
    }
}
