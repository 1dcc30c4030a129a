use log::{info, warn};
use num_traits::FromPrimitive;

use super::KernelArgs;
use crate::{
    error::{VmError, VmResult},
    heap::Register,
    pmachine::PMachine,
    resource::ResourceType,
};

pub(super) fn load(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (res_type, res_num) = (args.u16(0), args.u16(1));
    info!("Kernel> Load res_type: {:x}, res_num: {}", res_type, res_num);
    // SCI0 passes the type with the high bit set
    let Some(resource_type) = ResourceType::from_u16(res_type & 0x7f) else {
        warn!("Load of unknown resource type {res_type:x}");
        return Ok(Register::NULL);
    };
    if pm.resources.find_resource(resource_type, res_num).is_none() {
        warn!("Load of missing {resource_type:?} {res_num}");
        return Ok(Register::NULL);
    }
    Ok(Register::new(0, ((resource_type as u16) << 11) | res_num))
}

pub(super) fn unload(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    info!("Kernel> UnLoad {:x} {}", args.u16(0), args.u16(1));
    Ok(pm.registers.acc)
}

pub(super) fn script_id(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (script_number, export) = (args.u16(0), args.u16(1));
    info!(
        "Kernel> ScriptID script_number: {}, dispatch_number: {}",
        script_number, export
    );
    let seg = pm.heap.instantiate_script(pm.resources, script_number)?;
    let script = pm.heap.get_script(seg)?;
    match script.export_address(export) {
        Some(offset) => Ok(Register::new(seg, offset)),
        None => {
            warn!("Script {script_number} has no export {export}");
            Ok(Register::NULL)
        }
    }
}

pub(super) fn dispose_script(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let script_number = args.u16(0);
    info!("Kernel> Dispose script {}", script_number);
    let Some(seg) = pm.heap.script_segment(script_number) else {
        return Ok(pm.registers.acc);
    };
    let script = pm.heap.get_script_mut(seg)?;
    if script.marked_as_deleted {
        return Ok(pm.registers.acc);
    }
    script.marked_as_deleted = true;
    pm.heap.decrement_lockers(seg);

    let executing = pm.heap.stack().frames.iter().any(|f| f.script == seg);
    if pm.heap.get_script(seg)?.lockers == 0 && !executing {
        pm.heap.uninstantiate_script(script_number);
    }
    Ok(pm.registers.acc)
}

pub(super) fn clone(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let source = args.get(0);
    let clone = pm.heap.clone_object(source)?;
    info!("Kernel> Clone obj: {} to {}", pm.heap.object_name(source), clone);

    // initial property values follow the argument list as selector/value pairs
    for pair in args.rest(1).chunks_exact(2) {
        pm.heap.write_selector(clone, pair[0].to_u16(), pair[1])?;
    }
    Ok(clone)
}

pub(super) fn dispose_clone(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let id = args.get(0);
    info!("Kernel> Dispose Clone obj: {}", id);
    let object = pm.heap.get_object_mut(id)?;
    if !object.is_clone() {
        warn!("Attempt to dispose non-clone {id}");
        return Ok(pm.registers.acc);
    }
    object.mark_as_freed();
    let script = object.script;
    pm.heap.decrement_lockers(script);
    Ok(pm.registers.acc)
}

pub(super) fn is_object(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let candidate = args.get(0);
    let is_obj = pm.heap.is_object(candidate);
    info!("Kernel> IsObject {} = {}", candidate, is_obj);
    Ok(Register::from_bool(is_obj))
}

pub(super) fn responds_to(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (object, selector) = (args.get(0), args.u16(1));
    info!("Kernel> RespondsTo {} {}", object, pm.selectors.name(selector));
    if !pm.heap.is_object(object) {
        return Err(VmError::InvalidReference(object));
    }
    Ok(Register::from_bool(pm.heap.responds_to(object, selector)))
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
        resource::ResourceType,
    };

    #[test]
    fn script_id_instantiates_and_returns_exports() {
        let (mut resources, _, instance) = class_resources();
        resources.insert(ResourceType::View, 7, vec![0; 8]);
        let mut pm = PMachine::new(
            &resources,
            EngineConfig::headless(),
            Box::<NullDisplay>::default(),
            Box::<ScriptedEvents>::default(),
        );

        let loaded = pm.call_kernel("Load", &[Register::value(0x80), Register::value(7)]).unwrap();
        assert_eq!(loaded, Register::value(7));
        assert_eq!(pm.call_kernel("Load", &[Register::value(0x80), Register::value(8)]), Ok(Register::NULL));

        let seg = pm.heap.instantiate_script(&resources, 0).unwrap();
        let object = Register::new(seg, instance);
        assert_eq!(pm.call_kernel("IsObject", &[object]), Ok(Register::value(1)));
        assert_eq!(pm.call_kernel("IsObject", &[Register::value(3)]), Ok(Register::value(0)));

        let clone = pm.call_kernel("Clone", &[object, Register::value(4), Register::value(9)]).unwrap();
        assert_eq!(pm.heap.read_selector(clone, 4), Ok(Register::value(9)));
        assert_eq!(pm.heap.read_selector(object, 4), Ok(Register::value(20)));

        pm.call_kernel("DisposeClone", &[clone]).unwrap();
        assert!(!pm.heap.is_object(clone));
        // a stale clone is a recoverable error, not a crash
        assert_eq!(pm.call_kernel("DisposeClone", &[clone]), Ok(Register::NULL));
    }
}
