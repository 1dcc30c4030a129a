use crate::error::{VmError, VmResult};

use super::{Register, SegManager, Segment};

/// Doubly linked list header. `checkpoints` holds the pending successor of every
/// iteration currently walking the list, innermost last.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct List {
    pub first: Register,
    pub last: Register,
    pub checkpoints: Vec<Register>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    pub pred: Register,
    pub succ: Register,
    pub key: Register,
    pub value: Register,
}

impl SegManager {
    pub fn new_list(&mut self) -> Register {
        self.allocate(List::default())
    }

    pub fn new_node(&mut self, value: Register, key: Register) -> Register {
        self.allocate(Node {
            value,
            key,
            ..Default::default()
        })
    }

    pub fn list(&self, r: Register) -> VmResult<&List> {
        self.lookup::<List>(r)
    }

    pub fn list_mut(&mut self, r: Register) -> VmResult<&mut List> {
        self.lookup_mut::<List>(r)
    }

    pub fn node(&self, r: Register) -> VmResult<&Node> {
        self.lookup::<Node>(r)
    }

    pub fn node_mut(&mut self, r: Register) -> VmResult<&mut Node> {
        self.lookup_mut::<Node>(r)
    }

    pub fn add_to_front(&mut self, list: Register, node: Register) -> VmResult<()> {
        let first = self.list(list)?.first;
        {
            let n = self.node_mut(node)?;
            n.pred = Register::NULL;
            n.succ = first;
        }
        if first.is_null() {
            self.list_mut(list)?.last = node;
        } else {
            self.node_mut(first)?.pred = node;
        }
        self.list_mut(list)?.first = node;
        Ok(())
    }

    pub fn add_to_end(&mut self, list: Register, node: Register) -> VmResult<()> {
        let last = self.list(list)?.last;
        {
            let n = self.node_mut(node)?;
            n.pred = last;
            n.succ = Register::NULL;
        }
        if last.is_null() {
            self.list_mut(list)?.first = node;
        } else {
            self.node_mut(last)?.succ = node;
        }
        self.list_mut(list)?.last = node;
        Ok(())
    }

    /// Inserts `node` after `anchor`; a null anchor puts it at the front
    pub fn add_after(&mut self, list: Register, anchor: Register, node: Register) -> VmResult<()> {
        if anchor.is_null() {
            return self.add_to_front(list, node);
        }
        self.list(list)?;
        let old_next = self.node(anchor)?.succ;
        {
            let n = self.node_mut(node)?;
            n.pred = anchor;
            n.succ = old_next;
        }
        self.node_mut(anchor)?.succ = node;
        if old_next.is_null() {
            self.list_mut(list)?.last = node;
        } else {
            self.node_mut(old_next)?.pred = node;
        }
        Ok(())
    }

    /// Inserts `node` before `anchor`; a null anchor puts it at the front
    pub fn add_before(&mut self, list: Register, anchor: Register, node: Register) -> VmResult<()> {
        if anchor.is_null() {
            return self.add_to_front(list, node);
        }
        self.list(list)?;
        let old_prev = self.node(anchor)?.pred;
        {
            let n = self.node_mut(node)?;
            n.pred = old_prev;
            n.succ = anchor;
        }
        self.node_mut(anchor)?.pred = node;
        if old_prev.is_null() {
            self.list_mut(list)?.first = node;
        } else {
            self.node_mut(old_prev)?.succ = node;
        }
        Ok(())
    }

    /// First node whose key is the same reference as `key`, or null
    pub fn find_key(&self, list: Register, key: Register) -> VmResult<Register> {
        let mut r = self.list(list)?.first;
        while !r.is_null() {
            let node = self.node(r)?;
            if node.key == key {
                return Ok(r);
            }
            r = node.succ;
        }
        Ok(Register::NULL)
    }

    /// Unlinks the node holding `key`. Iterations about to step onto it move on to its successor.
    pub fn delete_key(&mut self, list: Register, key: Register) -> VmResult<bool> {
        let r = self.find_key(list, key)?;
        if r.is_null() {
            return Ok(false);
        }
        let Node { pred, succ, .. } = self.node(r)?.clone();

        if pred.is_null() {
            self.list_mut(list)?.first = succ;
        } else {
            self.node_mut(pred)?.succ = succ;
        }
        if succ.is_null() {
            self.list_mut(list)?.last = pred;
        } else {
            self.node_mut(succ)?.pred = pred;
        }

        for checkpoint in self.list_mut(list)?.checkpoints.iter_mut() {
            if *checkpoint == r {
                *checkpoint = succ;
            }
        }

        let n = self.node_mut(r)?;
        n.pred = Register::NULL;
        n.succ = Register::NULL;
        Ok(true)
    }

    pub fn list_nodes(&self, list: Register) -> VmResult<Vec<Register>> {
        let mut nodes = Vec::new();
        let mut r = self.list(list)?.first;
        while !r.is_null() {
            nodes.push(r);
            r = self.node(r)?.succ;
        }
        Ok(nodes)
    }

    /// Starts a nested walk of `list`; returns the depth slot to update
    pub fn push_checkpoint(&mut self, list: Register, max_depth: usize) -> VmResult<usize> {
        let l = self.list_mut(list)?;
        if l.checkpoints.len() >= max_depth {
            return Err(VmError::RecursionLimitExceeded(l.checkpoints.len() + 1));
        }
        l.checkpoints.push(Register::NULL);
        Ok(l.checkpoints.len() - 1)
    }

    pub fn set_checkpoint(&mut self, list: Register, depth: usize, next: Register) -> VmResult<()> {
        match self.list_mut(list)?.checkpoints.get_mut(depth) {
            Some(c) => {
                *c = next;
                Ok(())
            }
            None => Err(VmError::HeapCorruption(format!("no checkpoint {depth} on list {list}"))),
        }
    }

    pub fn checkpoint(&self, list: Register, depth: usize) -> VmResult<Register> {
        self.list(list)?
            .checkpoints
            .get(depth)
            .copied()
            .ok_or_else(|| VmError::HeapCorruption(format!("no checkpoint {depth} on list {list}")))
    }

    pub fn clear_checkpoints(&mut self) {
        for segment in self.segments.iter_mut().flatten() {
            if let Segment::Lists(table) = segment {
                for list in table.iter_mut() {
                    list.checkpoints.clear();
                }
            }
        }
    }

    pub fn pop_checkpoint(&mut self, list: Register) -> VmResult<()> {
        self.list_mut(list)?.checkpoints.pop();
        Ok(())
    }

    pub fn check_list(&self, list: Register) -> VmResult<()> {
        let l = self.list(list)?;
        let corrupt = |what: String| Err(VmError::HeapCorruption(format!("list {list}: {what}")));
        if l.first.is_null() != l.last.is_null() {
            return corrupt("only one end is null".into());
        }
        let mut prev = Register::NULL;
        let mut r = l.first;
        while !r.is_null() {
            let node = self.node(r)?;
            if node.pred != prev {
                return corrupt(format!("node {r} has pred {} instead of {prev}", node.pred));
            }
            prev = r;
            r = node.succ;
        }
        if prev != l.last {
            return corrupt(format!("chain ends at {prev} but last is {}", l.last));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::heap::tests::empty_heap;

    fn keyed(heap: &mut SegManager, keys: &[i16]) -> (Register, Vec<Register>) {
        let list = heap.new_list();
        let nodes = keys
            .iter()
            .map(|&k| {
                let n = heap.new_node(Register::value(k * 10), Register::value(k));
                heap.add_to_end(list, n).unwrap();
                n
            })
            .collect();
        (list, nodes)
    }

    #[test]
    fn front_and_end_insertion_keep_links() {
        let mut heap = empty_heap();
        let list = heap.new_list();
        let b = heap.new_node(Register::NULL, Register::value(2));
        let a = heap.new_node(Register::NULL, Register::value(1));
        let c = heap.new_node(Register::NULL, Register::value(3));
        heap.add_to_front(list, b).unwrap();
        heap.add_to_front(list, a).unwrap();
        heap.add_to_end(list, c).unwrap();

        assert_eq!(heap.list_nodes(list).unwrap(), vec![a, b, c]);
        heap.check_list(list).unwrap();
    }

    #[test]
    fn add_after_and_before() {
        let mut heap = empty_heap();
        let (list, nodes) = keyed(&mut heap, &[1, 3]);
        let two = heap.new_node(Register::NULL, Register::value(2));
        heap.add_after(list, nodes[0], two).unwrap();
        let four = heap.new_node(Register::NULL, Register::value(4));
        heap.add_after(list, nodes[1], four).unwrap();
        let zero = heap.new_node(Register::NULL, Register::value(0));
        heap.add_before(list, nodes[0], zero).unwrap();
        let front = heap.new_node(Register::NULL, Register::value(-1));
        heap.add_after(list, Register::NULL, front).unwrap();

        assert_eq!(
            heap.list_nodes(list).unwrap(),
            vec![front, zero, nodes[0], two, nodes[1], four]
        );
        assert_eq!(heap.list(list).unwrap().last, four);
        heap.check_list(list).unwrap();
    }

    #[test]
    fn find_key_compares_references() {
        let mut heap = empty_heap();
        let (list, nodes) = keyed(&mut heap, &[1, 2]);
        assert_eq!(heap.find_key(list, Register::value(2)).unwrap(), nodes[1]);
        assert_eq!(heap.find_key(list, Register::new(3, 2)).unwrap(), Register::NULL);
    }

    #[test]
    fn delete_ends_and_middle() {
        let mut heap = empty_heap();
        let (list, nodes) = keyed(&mut heap, &[1, 2, 3]);

        assert!(heap.delete_key(list, Register::value(2)).unwrap());
        assert_eq!(heap.node(nodes[1]).unwrap().succ, Register::NULL);
        assert!(heap.delete_key(list, Register::value(1)).unwrap());
        assert!(heap.delete_key(list, Register::value(3)).unwrap());
        assert!(!heap.delete_key(list, Register::value(3)).unwrap());

        let l = heap.list(list).unwrap();
        assert_eq!((l.first, l.last), (Register::NULL, Register::NULL));
        heap.check_list(list).unwrap();
    }

    #[test]
    fn deleting_checkpointed_node_moves_checkpoint() {
        let mut heap = empty_heap();
        let (list, nodes) = keyed(&mut heap, &[1, 2, 3]);
        let outer = heap.push_checkpoint(list, 4).unwrap();
        heap.set_checkpoint(list, outer, nodes[1]).unwrap();
        let inner = heap.push_checkpoint(list, 4).unwrap();
        heap.set_checkpoint(list, inner, nodes[2]).unwrap();

        heap.delete_key(list, Register::value(2)).unwrap();
        assert_eq!(heap.checkpoint(list, outer).unwrap(), nodes[2]);
        assert_eq!(heap.checkpoint(list, inner).unwrap(), nodes[2]);
    }

    #[test]
    fn checkpoint_depth_is_bounded() {
        let mut heap = empty_heap();
        let list = heap.new_list();
        for _ in 0..4 {
            heap.push_checkpoint(list, 4).unwrap();
        }
        assert_eq!(
            heap.push_checkpoint(list, 4),
            Err(VmError::RecursionLimitExceeded(5))
        );
    }

    #[test]
    fn detects_broken_chain() {
        let mut heap = empty_heap();
        let (list, nodes) = keyed(&mut heap, &[1, 2]);
        heap.node_mut(nodes[1]).unwrap().pred = Register::NULL;
        assert!(matches!(heap.check_list(list), Err(VmError::HeapCorruption(_))));
    }
}
