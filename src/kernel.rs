use log::warn;

use crate::{
    config::SelectorPolicy,
    error::{VmError, VmResult},
    heap::Register,
    pmachine::PMachine,
};

mod events;
mod game;
mod graphics;
mod lists;
mod math;
mod movement;
mod scripts;
mod strings;
mod ui;

pub type KernelFn = fn(&mut PMachine<'_>, &KernelArgs) -> VmResult<Register>;

/// Kernel names of an SCI0 interpreter, by id, for games without vocab 999
const SCI0_KERNEL_NAMES: &[&str] = &[
    "Load", "UnLoad", "ScriptID", "DisposeScript", "Clone", "DisposeClone", "IsObject", "RespondsTo",
    "DrawPic", "Show", "PicNotValid", "Animate", "SetNowSeen", "NumLoops", "NumCels", "CelWide",
    "CelHigh", "DrawCel", "AddToPic", "NewWindow", "GetPort", "SetPort", "DisposeWindow", "DrawControl",
    "HiliteControl", "EditControl", "TextSize", "Display", "GetEvent", "GlobalToLocal", "LocalToGlobal",
    "MapKeyToDir", "DrawMenuBar", "MenuSelect", "AddMenu", "DrawStatus", "Parse", "Said", "SetSynonyms",
    "HaveMouse", "SetCursor", "SaveGame", "RestoreGame", "RestartGame", "GameIsRestarting", "DoSound",
    "NewList", "DisposeList", "NewNode", "FirstNode", "LastNode", "EmptyList", "NextNode", "PrevNode",
    "NodeValue", "AddAfter", "AddToFront", "AddToEnd", "FindKey", "DeleteKey", "Random", "Abs", "Sqrt",
    "GetAngle", "GetDistance", "Wait", "GetTime", "StrEnd", "StrCat", "StrCmp", "StrLen", "StrCpy",
    "Format", "GetFarText", "ReadNumber", "BaseSetter", "DirLoop", "CanBeHere", "OnControl",
    "InitBresen", "DoBresen", "DoAvoider", "SetJump", "SetDebug", "InspectObj", "ShowSends", "ShowObjs",
    "ShowFree", "MemoryInfo", "StackUsage", "Profiler", "GetMenu", "SetMenu", "GetSaveFiles", "GetCWD",
    "CheckFreeSpace", "ValidPath", "CoordPri", "StrAt", "DeviceInfo", "GetSaveDir", "CheckSaveGame",
    "ShakeScreen", "FlushResources", "SinMult", "CosMult", "SinDiv", "CosDiv", "Graph", "Joystick",
];

/// Later additions, appended after the SCI0 ids so scripts built against the default table can use them
const EXTRA_KERNEL_NAMES: &[&str] = &[
    "AddBefore",
    "ListEachElementDo",
    "ListFirstTrue",
    "ListAllTrue",
    "ListAt",
    "ListIndexOf",
    "PriCoord",
    "CantBeHere",
    "Sort",
    "ATan",
];

/// Arguments of one kernel call, without the leading argc.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KernelArgs {
    args: Vec<Register>,
}

impl KernelArgs {
    pub fn new(args: Vec<Register>) -> Self {
        Self { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Missing arguments read as null
    pub fn get(&self, index: usize) -> Register {
        self.opt(index).unwrap_or_default()
    }

    pub fn opt(&self, index: usize) -> Option<Register> {
        self.args.get(index).copied()
    }

    pub fn i16(&self, index: usize) -> i16 {
        self.get(index).to_i16()
    }

    pub fn u16(&self, index: usize) -> u16 {
        self.get(index).to_u16()
    }

    pub fn as_slice(&self) -> &[Register] {
        &self.args
    }

    /// Everything from `index` on, for forwarding to a selector
    pub fn rest(&self, index: usize) -> &[Register] {
        self.args.get(index..).unwrap_or_default()
    }
}

struct KernelFunction {
    name: String,
    handler: Option<KernelFn>,
}

/// Kernel ids to handlers, in the order of the game's kernel name table.
pub struct KernelTable {
    functions: Vec<KernelFunction>,
}

impl KernelTable {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        let functions = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                let handler = handler_for(&name);
                KernelFunction { name, handler }
            })
            .collect();
        Self { functions }
    }

    pub fn sci0_default() -> Self {
        Self::new(SCI0_KERNEL_NAMES.iter().chain(EXTRA_KERNEL_NAMES).copied())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn id(&self, name: &str) -> Option<u16> {
        self.functions.iter().position(|f| f.name == name).map(|i| i as u16)
    }

    pub fn name(&self, id: u16) -> Option<&str> {
        self.functions.get(id as usize).map(|f| f.name.as_str())
    }

    /// Names in the table the interpreter has no handler for
    pub fn unimplemented(&self) -> impl Iterator<Item = &str> {
        self.functions
            .iter()
            .filter(|f| f.handler.is_none())
            .map(|f| f.name.as_str())
    }
}

fn handler_for(name: &str) -> Option<KernelFn> {
    let handler: KernelFn = match name {
        "Load" => scripts::load,
        "UnLoad" => scripts::unload,
        "ScriptID" => scripts::script_id,
        "DisposeScript" => scripts::dispose_script,
        "Clone" => scripts::clone,
        "DisposeClone" => scripts::dispose_clone,
        "IsObject" => scripts::is_object,
        "RespondsTo" => scripts::responds_to,

        "NewList" => lists::new_list,
        "DisposeList" => lists::dispose_list,
        "NewNode" => lists::new_node,
        "FirstNode" => lists::first_node,
        "LastNode" => lists::last_node,
        "EmptyList" => lists::empty_list,
        "NextNode" => lists::next_node,
        "PrevNode" => lists::prev_node,
        "NodeValue" => lists::node_value,
        "AddAfter" => lists::add_after,
        "AddBefore" => lists::add_before,
        "AddToFront" => lists::add_to_front,
        "AddToEnd" => lists::add_to_end,
        "FindKey" => lists::find_key,
        "DeleteKey" => lists::delete_key,
        "ListEachElementDo" => lists::each_element_do,
        "ListFirstTrue" => lists::first_true,
        "ListAllTrue" => lists::all_true,
        "ListAt" => lists::list_at,
        "ListIndexOf" => lists::index_of,
        "Sort" => lists::sort,

        "Random" => math::random,
        "Abs" => math::abs,
        "Sqrt" => math::sqrt,
        "GetAngle" => math::get_angle,
        "GetDistance" => math::get_distance,
        "SinMult" => math::sin_mult,
        "CosMult" => math::cos_mult,
        "SinDiv" => math::sin_div,
        "CosDiv" => math::cos_div,
        "ATan" => math::atan,
        "Wait" => math::wait,
        "GetTime" => math::get_time,

        "StrEnd" => strings::str_end,
        "StrCat" => strings::str_cat,
        "StrCmp" => strings::str_cmp,
        "StrLen" => strings::str_len,
        "StrCpy" => strings::str_cpy,
        "StrAt" => strings::str_at,
        "Format" => strings::format,
        "GetFarText" => strings::get_far_text,
        "ReadNumber" => strings::read_number,

        "DrawPic" => graphics::draw_pic,
        "Show" => graphics::show,
        "PicNotValid" => graphics::pic_not_valid,
        "Animate" => graphics::animate,
        "SetNowSeen" => graphics::set_now_seen,
        "NumLoops" => graphics::num_loops,
        "NumCels" => graphics::num_cels,
        "CelWide" => graphics::cel_wide,
        "CelHigh" => graphics::cel_high,
        "DrawCel" => graphics::draw_cel,
        "AddToPic" => graphics::add_to_pic,
        "OnControl" => graphics::on_control,
        "CoordPri" => graphics::coord_pri,
        "PriCoord" => graphics::pri_coord,
        "BaseSetter" => graphics::base_setter,
        "Graph" => graphics::graph,

        "DirLoop" => movement::dir_loop,
        "CanBeHere" => movement::can_be_here,
        "CantBeHere" => movement::cant_be_here,
        "InitBresen" => movement::init_bresen,
        "DoBresen" => movement::do_bresen,

        "GetEvent" => events::get_event,
        "GlobalToLocal" => events::global_to_local,
        "LocalToGlobal" => events::local_to_global,
        "MapKeyToDir" => events::map_key_to_dir,
        "HaveMouse" => events::have_mouse,

        "SaveGame" => game::save_game,
        "RestoreGame" => game::restore_game,
        "RestartGame" => game::restart_game,
        "GameIsRestarting" => game::game_is_restarting,
        "CheckSaveGame" => game::check_save_game,
        "GetSaveFiles" => game::get_save_files,
        "GetSaveDir" => game::get_save_dir,
        "GetCWD" => game::get_cwd,
        "CheckFreeSpace" => game::check_free_space,
        "ValidPath" => game::valid_path,
        "FlushResources" => game::flush_resources,
        "SetDebug" => game::set_debug,

        "NewWindow" => ui::new_window,
        "DisposeWindow" => ui::dispose_window,
        "GetPort" => ui::get_port,
        "SetPort" => ui::set_port,
        "Display" => ui::display,
        "TextSize" => ui::text_size,
        "DrawControl" | "HiliteControl" => ui::draw_control,
        "EditControl" => ui::edit_control,
        "DrawMenuBar" | "AddMenu" | "SetMenu" | "DrawStatus" => ui::menu,
        "MenuSelect" => ui::menu_select,
        "GetMenu" => ui::get_menu,
        "Parse" => ui::parse,
        "Said" => ui::said,
        "SetSynonyms" => ui::set_synonyms,
        "SetCursor" => ui::set_cursor,
        "DoSound" => ui::do_sound,
        "ShakeScreen" => ui::shake_screen,
        "Joystick" => ui::joystick,
        "DoAvoider" => ui::do_avoider,
        _ => return None,
    };
    Some(handler)
}

impl<'a> PMachine<'a> {
    pub(crate) fn call_kernel_id(&mut self, id: u16, args: &KernelArgs) -> VmResult<Register> {
        let function = self
            .kernel
            .functions
            .get(id as usize)
            .ok_or(VmError::UnknownKernelFunction(id))?;
        let (name, handler) = (function.name.clone(), function.handler);
        self.dispatch_kernel(&name, handler, args)
    }

    /// Runs a kernel function by name, whether or not the game's table lists it
    pub fn call_kernel(&mut self, name: &str, args: &[Register]) -> VmResult<Register> {
        let handler = handler_for(name);
        self.dispatch_kernel(name, handler, &KernelArgs::new(args.to_vec()))
    }

    fn dispatch_kernel(&mut self, name: &str, handler: Option<KernelFn>, args: &KernelArgs) -> VmResult<Register> {
        let Some(handler) = handler else {
            if !self.config.stub_missing_kernel {
                return Err(VmError::MissingKernelFunction(name.to_string()));
            }
            warn!("Kernel> {name} is not implemented, returning 0");
            return Ok(Register::NULL);
        };
        let roots = self.kernel_roots.len();
        let result = handler(self, args);
        self.kernel_roots.truncate(roots);

        match result {
            Err(e @ VmError::InvalidReference(_)) => {
                warn!("Kernel> {name}: {e}, returning 0");
                Ok(Register::NULL)
            }
            Err(e @ VmError::SelectorNotFound { .. }) if self.config.selector_policy == SelectorPolicy::Continue => {
                warn!("Kernel> {name}: {e}, returning 0");
                Ok(Register::NULL)
            }
            other => other,
        }
    }

    /// Writes a selector the kernel maintains. Objects without it are left alone.
    pub(crate) fn set_selector(&mut self, object: Register, selector: u16, value: Register) -> VmResult<()> {
        match self.heap.write_selector(object, selector, value) {
            Err(VmError::SelectorNotFound { .. }) => Ok(()),
            other => other,
        }
    }

    pub(crate) fn set_selector_i16(&mut self, object: Register, selector: u16, value: i16) -> VmResult<()> {
        self.set_selector(object, selector, Register::value(value))
    }

    pub(crate) fn selector_i16(&self, object: Register, selector: u16) -> i16 {
        self.heap.read_selector_i16(object, selector, 0)
    }

    pub(crate) fn invoke_if_present(&mut self, object: Register, selector: u16, args: &[Register]) -> VmResult<Option<Register>> {
        if !self.heap.responds_to(object, selector) {
            return Ok(None);
        }
        self.kernel_roots.push(object);
        self.invoke_selector(object, selector, args).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;
    use crate::{
        config::EngineConfig, events::ScriptedEvents, graphics::NullDisplay, resource::ResourceManager,
    };

    #[test]
    fn default_table_keeps_sci0_ids() {
        let table = KernelTable::sci0_default();
        assert_eq!(table.id("Load"), Some(0));
        assert_eq!(table.id("NewList"), Some(0x2e));
        assert_eq!(table.id("Joystick"), Some(0x6d));
        assert_eq!(table.name(0x3c), Some("Random"));
        assert_eq!(table.id("ListEachElementDo"), Some(0x6f));
        assert_eq!(table.unimplemented().collect::<Vec<_>>(), vec![
            "SetJump", "InspectObj", "ShowSends", "ShowObjs", "ShowFree", "MemoryInfo", "StackUsage", "Profiler",
            "DeviceInfo",
        ]);
    }

    #[test]
    fn game_tables_bind_handlers_by_name() {
        let table = KernelTable::new(["Palette", "CantBeHere", "Sort"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.unimplemented().collect::<Vec<_>>(), vec!["Palette"]);
    }

    #[test]
    fn missing_arguments_read_as_null() {
        let args = KernelArgs::new(vec![Register::value(-2)]);
        assert_eq!(args.i16(0), -2);
        assert_eq!(args.u16(0), 0xfffe);
        assert_eq!(args.get(3), Register::NULL);
        assert_eq!(args.opt(1), None);
        assert!(args.rest(4).is_empty());
    }

    #[test_case(false, Err(VmError::MissingKernelFunction("ShowFree".into())); "stops")]
    #[test_case(true, Ok(Register::NULL); "stubbed")]
    fn calls_without_a_handler(stub_missing_kernel: bool, expected: VmResult<Register>) {
        let resources = ResourceManager::default();
        let config = EngineConfig {
            stub_missing_kernel,
            ..EngineConfig::headless()
        };
        let mut pm = PMachine::new(
            &resources,
            config,
            Box::<NullDisplay>::default(),
            Box::<ScriptedEvents>::default(),
        );
        let result = pm.call_kernel("ShowFree", &[]);
        assert_eq!(result.as_ref().map_err(VmError::is_fatal), expected.as_ref().map_err(|_| true));
        assert_eq!(result, expected);
    }
}
