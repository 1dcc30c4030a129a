use std::ops::ControlFlow;

use log::{debug, info};

use super::KernelArgs;
use crate::{
    error::{VmError, VmResult},
    heap::Register,
    pmachine::{AbortRequest, PMachine},
    selector::SelectorLookup,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Walk {
    Finished,
    Stopped(Register),
    /// A restore or restart replaced the heap; nothing may be touched any more
    Aborted,
}

/// Calls `visit` with each node value of `list`. `visit` may delete any node,
/// including the one being visited and the one after it.
fn walk_list<'a>(
    pm: &mut PMachine<'a>,
    list: Register,
    mut visit: impl FnMut(&mut PMachine<'a>, Register) -> VmResult<ControlFlow<Register>>,
) -> VmResult<Walk> {
    let depth = pm.heap.push_checkpoint(list, pm.config.max_list_recursion)?;
    let result = walk_from_checkpoint(pm, list, depth, &mut visit);
    if pm.abort == AbortRequest::None && pm.heap.pop_checkpoint(list).is_err() {
        debug!("List {list} went away while it was walked");
    }
    result
}

fn walk_from_checkpoint<'a>(
    pm: &mut PMachine<'a>,
    list: Register,
    depth: usize,
    visit: &mut impl FnMut(&mut PMachine<'a>, Register) -> VmResult<ControlFlow<Register>>,
) -> VmResult<Walk> {
    let mut current = pm.heap.list(list)?.first;
    while !current.is_null() {
        let node = pm
            .heap
            .node(current)
            .map_err(|_| VmError::HeapCorruption(format!("{current} in list {list} is not a node")))?;
        let (next, value) = (node.succ, node.value);
        pm.heap.set_checkpoint(list, depth, next)?;

        pm.kernel_roots.push(value);
        let flow = visit(pm, value)?;
        if pm.abort != AbortRequest::None {
            return Ok(Walk::Aborted);
        }
        if let ControlFlow::Break(result) = flow {
            return Ok(Walk::Stopped(result));
        }
        current = pm.heap.checkpoint(list, depth)?;
    }
    Ok(Walk::Finished)
}

/// Sends `selector` to `object`, or reads it when it is a property
fn call_or_read(pm: &mut PMachine<'_>, object: Register, selector: u16, args: &[Register]) -> VmResult<Register> {
    match pm.heap.lookup_selector(object, selector)? {
        SelectorLookup::Variable(_) => pm.heap.read_selector(object, selector),
        _ => pm.invoke_selector(object, selector, args),
    }
}

pub(super) fn new_list(pm: &mut PMachine<'_>, _args: &KernelArgs) -> VmResult<Register> {
    let list = pm.heap.new_list();
    info!("Kernel> NewList {}", list);
    Ok(list)
}

pub(super) fn dispose_list(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    // the collector frees the list and its nodes once nothing refers to them
    info!("Kernel> DisposeList {}", args.get(0));
    Ok(pm.registers.acc)
}

pub(super) fn new_node(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let value = args.get(0);
    let key = args.opt(1).unwrap_or(value);
    let node = pm.heap.new_node(value, key);
    debug!("Kernel> NewNode {} value: {}, key: {}", node, value, key);
    Ok(node)
}

pub(super) fn first_node(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let list = args.get(0);
    if list.is_null() {
        return Ok(Register::NULL);
    }
    Ok(pm.heap.list(list)?.first)
}

pub(super) fn last_node(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let list = args.get(0);
    if list.is_null() {
        return Ok(Register::NULL);
    }
    Ok(pm.heap.list(list)?.last)
}

pub(super) fn empty_list(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let list = args.get(0);
    if list.is_null() {
        return Ok(Register::NULL);
    }
    Ok(Register::from_bool(pm.heap.list(list)?.first.is_null()))
}

pub(super) fn next_node(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let node = args.get(0);
    if node.is_null() {
        return Ok(Register::NULL);
    }
    Ok(pm.heap.node(node)?.succ)
}

pub(super) fn prev_node(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let node = args.get(0);
    if node.is_null() {
        return Ok(Register::NULL);
    }
    Ok(pm.heap.node(node)?.pred)
}

pub(super) fn node_value(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let node = args.get(0);
    if node.is_null() {
        return Ok(Register::NULL);
    }
    Ok(pm.heap.node(node)?.value)
}

fn set_key(pm: &mut PMachine<'_>, node: Register, key: Option<Register>) -> VmResult<()> {
    if let Some(key) = key {
        pm.heap.node_mut(node)?.key = key;
    }
    Ok(())
}

pub(super) fn add_after(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (list, anchor, node) = (args.get(0), args.get(1), args.get(2));
    debug!("Kernel> AddAfter {} in {} after {}", node, list, anchor);
    set_key(pm, node, args.opt(3))?;
    pm.heap.add_after(list, anchor, node)?;
    Ok(node)
}

pub(super) fn add_before(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (list, anchor, node) = (args.get(0), args.get(1), args.get(2));
    debug!("Kernel> AddBefore {} in {} before {}", node, list, anchor);
    set_key(pm, node, args.opt(3))?;
    pm.heap.add_before(list, anchor, node)?;
    Ok(node)
}

pub(super) fn add_to_front(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (list, node) = (args.get(0), args.get(1));
    set_key(pm, node, args.opt(2))?;
    pm.heap.add_to_front(list, node)?;
    Ok(node)
}

pub(super) fn add_to_end(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (list, node) = (args.get(0), args.get(1));
    set_key(pm, node, args.opt(2))?;
    pm.heap.add_to_end(list, node)?;
    Ok(node)
}

pub(super) fn find_key(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (list, key) = (args.get(0), args.get(1));
    if list.is_null() {
        return Ok(Register::NULL);
    }
    pm.heap.find_key(list, key)
}

pub(super) fn delete_key(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (list, key) = (args.get(0), args.get(1));
    if list.is_null() {
        return Ok(Register::NULL);
    }
    let deleted = pm.heap.delete_key(list, key)?;
    debug!("Kernel> DeleteKey {} from {}: {}", key, list, deleted);
    Ok(Register::from_bool(deleted))
}

pub(super) fn each_element_do(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (list, selector) = (args.get(0), args.u16(1));
    if list.is_null() {
        return Ok(pm.registers.acc);
    }
    let params = args.rest(2).to_vec();
    debug!("Kernel> ListEachElementDo {} {}", list, pm.selectors.name(selector));

    walk_list(pm, list, |pm, object| {
        match pm.heap.lookup_selector(object, selector)? {
            SelectorLookup::Variable(_) => {
                // a property is assigned the first argument, or left alone if there is none
                if let Some(&value) = params.first() {
                    pm.heap.write_selector(object, selector, value)?;
                }
            }
            _ => {
                pm.invoke_selector(object, selector, &params)?;
            }
        }
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(pm.registers.acc)
}

pub(super) fn first_true(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (list, selector) = (args.get(0), args.u16(1));
    if list.is_null() {
        return Ok(Register::NULL);
    }
    let params = args.rest(2).to_vec();
    let walk = walk_list(pm, list, |pm, object| {
        if call_or_read(pm, object, selector, &params)?.is_zero_or_null() {
            Ok(ControlFlow::Continue(()))
        } else {
            Ok(ControlFlow::Break(object))
        }
    })?;
    Ok(match walk {
        Walk::Stopped(object) => object,
        Walk::Finished => Register::NULL,
        Walk::Aborted => pm.registers.acc,
    })
}

pub(super) fn all_true(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (list, selector) = (args.get(0), args.u16(1));
    if list.is_null() {
        return Ok(Register::value(1));
    }
    let params = args.rest(2).to_vec();
    let walk = walk_list(pm, list, |pm, object| {
        if call_or_read(pm, object, selector, &params)?.is_zero_or_null() {
            Ok(ControlFlow::Break(Register::NULL))
        } else {
            Ok(ControlFlow::Continue(()))
        }
    })?;
    Ok(match walk {
        Walk::Stopped(result) => result,
        Walk::Finished => Register::value(1),
        Walk::Aborted => pm.registers.acc,
    })
}

pub(super) fn list_at(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (list, index) = (args.get(0), args.i16(1));
    if list.is_null() || index < 0 {
        return Ok(Register::NULL);
    }
    let nodes = pm.heap.list_nodes(list)?;
    match nodes.get(index as usize) {
        Some(&node) => Ok(pm.heap.node(node)?.value),
        None => Ok(Register::NULL),
    }
}

pub(super) fn index_of(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (list, wanted) = (args.get(0), args.get(1));
    if list.is_null() {
        return Ok(Register::value(-1));
    }
    for (index, node) in pm.heap.list_nodes(list)?.into_iter().enumerate() {
        if pm.heap.node(node)?.value == wanted {
            return Ok(Register::value(index as i16));
        }
    }
    Ok(Register::value(-1))
}

/// Sort(source, dest, order): copies source's elements into dest, ordered by what
/// order's doit answers for each. Ties keep their original order.
pub(super) fn sort(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (source, dest, order) = (args.get(0), args.get(1), args.get(2));
    let size = pm.selector_i16(source, pm.sel.size);
    info!("Kernel> Sort {} into {} ({} elements)", source, dest, size);
    if size == 0 {
        return Ok(pm.registers.acc);
    }
    let input = pm.heap.read_selector(source, pm.sel.elements)?;
    let mut output = pm.heap.read_selector(dest, pm.sel.elements)?;
    if output.is_null() {
        output = pm.heap.new_list();
        pm.heap.write_selector(dest, pm.sel.elements, output)?;
    }
    pm.set_selector_i16(dest, pm.sel.size, size)?;
    pm.kernel_roots.extend([source, dest, order]);

    let mut keyed = Vec::new();
    for node in pm.heap.list_nodes(input)? {
        let (value, key) = {
            let n = pm.heap.node(node)?;
            (n.value, n.key)
        };
        pm.kernel_roots.push(value);
        let rank = pm.invoke_selector(order, pm.sel.doit, &[value])?;
        if pm.abort != AbortRequest::None {
            return Ok(pm.registers.acc);
        }
        keyed.push((rank, value, key));
    }
    keyed.sort_by_key(|(rank, ..)| (rank.segment, rank.offset));

    for (_, value, key) in keyed {
        let node = pm.heap.new_node(value, key);
        pm.heap.add_to_end(output, node)?;
    }
    Ok(pm.registers.acc)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{
        config::EngineConfig,
        events::ScriptedEvents,
        graphics::NullDisplay,
        heap::{tests::class_resources, Register},
        pmachine::PMachine,
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

    fn values(pm: &mut PMachine<'_>, list: Register) -> Vec<i16> {
        let mut out = Vec::new();
        let mut node = pm.call_kernel("FirstNode", &[list]).unwrap();
        while !node.is_null() {
            out.push(pm.call_kernel("NodeValue", &[node]).unwrap().to_i16());
            node = pm.call_kernel("NextNode", &[node]).unwrap();
        }
        out
    }

    #[test]
    fn builds_and_edits_a_list() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources);
        let list = pm.call_kernel("NewList", &[]).unwrap();
        assert_eq!(pm.call_kernel("EmptyList", &[list]), Ok(Register::value(1)));

        let mut nodes = Vec::new();
        for v in [10, 20, 30] {
            let node = pm.call_kernel("NewNode", &[Register::value(v), Register::value(v)]).unwrap();
            pm.call_kernel("AddToEnd", &[list, node]).unwrap();
            nodes.push(node);
        }
        assert_eq!(values(&mut pm, list), vec![10, 20, 30]);
        assert_eq!(pm.call_kernel("FindKey", &[list, Register::value(20)]), Ok(nodes[1]));
        assert_eq!(pm.call_kernel("LastNode", &[list]), Ok(nodes[2]));

        assert_eq!(pm.call_kernel("DeleteKey", &[list, Register::value(20)]), Ok(Register::value(1)));
        assert_eq!(pm.call_kernel("DeleteKey", &[list, Register::value(20)]), Ok(Register::value(0)));
        assert_eq!(values(&mut pm, list), vec![10, 30]);
        assert_eq!(pm.heap.check_list(list), Ok(()));

        let front = pm.call_kernel("NewNode", &[Register::value(5)]).unwrap();
        pm.call_kernel("AddAfter", &[list, Register::NULL, front]).unwrap();
        let middle = pm.call_kernel("NewNode", &[Register::value(15)]).unwrap();
        pm.call_kernel("AddBefore", &[list, nodes[2], middle, Register::value(99)]).unwrap();
        assert_eq!(values(&mut pm, list), vec![5, 10, 15, 30]);
        assert_eq!(pm.call_kernel("FindKey", &[list, Register::value(99)]), Ok(middle));
        assert_eq!(pm.call_kernel("ListAt", &[list, Register::value(2)]), Ok(Register::value(15)));
        assert_eq!(pm.call_kernel("ListIndexOf", &[list, Register::value(30)]), Ok(Register::value(3)));
        assert_eq!(pm.call_kernel("ListIndexOf", &[list, Register::value(31)]), Ok(Register::value(-1)));
        assert_eq!(pm.heap.check_list(list), Ok(()));
    }

    #[test]
    fn null_lists_read_as_empty() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources);
        assert_eq!(pm.call_kernel("FirstNode", &[Register::NULL]), Ok(Register::NULL));
        assert_eq!(pm.call_kernel("NodeValue", &[Register::NULL]), Ok(Register::NULL));
        assert_eq!(pm.call_kernel("ListAllTrue", &[Register::NULL, Register::value(0)]), Ok(Register::value(1)));
    }

    #[test]
    fn each_element_do_assigns_properties() {
        let (resources, _, instance) = class_resources();
        let mut pm = machine(&resources);
        let seg = pm.heap.instantiate_script(&resources, 0).unwrap();
        let object = Register::new(seg, instance);
        let clone = pm.call_kernel("Clone", &[object]).unwrap();

        let list = pm.call_kernel("NewList", &[]).unwrap();
        for value in [object, clone] {
            let node = pm.call_kernel("NewNode", &[value]).unwrap();
            pm.call_kernel("AddToEnd", &[list, node]).unwrap();
        }
        pm.call_kernel("ListEachElementDo", &[list, Register::value(4), Register::value(3)])
            .unwrap();
        assert_eq!(pm.heap.read_selector(object, 4), Ok(Register::value(3)));
        assert_eq!(pm.heap.read_selector(clone, 4), Ok(Register::value(3)));

        pm.heap.write_selector(object, 4, Register::NULL).unwrap();
        let first = pm.call_kernel("ListFirstTrue", &[list, Register::value(4)]).unwrap();
        assert_eq!(first, clone);
        assert_eq!(pm.call_kernel("ListAllTrue", &[list, Register::value(4)]), Ok(Register::NULL));
        // the walk left no checkpoint behind
        assert!(pm.heap.list(list).unwrap().checkpoints.is_empty());
    }
}
