use std::collections::HashSet;

use log::{debug, info};

use super::{Register, SegManager, Segment, SegmentId};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    pub clones: usize,
    pub lists: usize,
    pub nodes: usize,
    pub hunks: usize,
    pub scripts: usize,
}

#[derive(Default)]
struct Marks {
    slots: HashSet<Register>,
    segments: HashSet<SegmentId>,
}

impl SegManager {
    /// Mark and sweep over clones, lists, nodes, hunks and deleted scripts.
    /// `extra_roots` are the interpreter registers; everything else is found from the heap.
    pub fn collect_garbage(&mut self, extra_roots: &[Register]) -> GcStats {
        let mut work: Vec<Register> = extra_roots.to_vec();

        let stack = self.stack();
        work.extend(stack.values.iter().copied());
        for frame in &stack.frames {
            work.push(frame.objp);
            work.push(frame.sendp);
            work.push(Register::new(frame.script, 0));
            if let Some(locals) = frame.locals {
                work.push(Register::new(locals, 0));
            }
        }
        work.extend(self.classes().iter().map(|c| c.reg));
        for (_, seg) in self.loaded_scripts() {
            if let Ok(script) = self.get_script(seg) {
                if !script.marked_as_deleted {
                    work.push(Register::new(seg, 0));
                }
            }
        }

        let marks = self.mark(work);
        self.sweep(&marks)
    }

    fn mark(&self, mut work: Vec<Register>) -> Marks {
        let mut marks = Marks::default();
        while let Some(r) = work.pop() {
            if r.is_number() {
                continue;
            }
            match self.segment(r.segment) {
                Some(Segment::Script(script)) => {
                    if marks.segments.insert(r.segment) {
                        for obj in script.objects.values() {
                            work.extend(obj.variables.iter().copied());
                        }
                        if let Some(locals) = script.locals_segment {
                            work.push(Register::new(locals, 0));
                        }
                    }
                }
                Some(Segment::Locals(locals)) => {
                    if marks.segments.insert(r.segment) {
                        work.extend(locals.locals.iter().copied());
                        if let Some(seg) = self.script_segment(locals.script) {
                            work.push(Register::new(seg, 0));
                        }
                    }
                }
                Some(Segment::Clones(table)) => {
                    if let Some(obj) = table.get(r.offset) {
                        if marks.slots.insert(r) {
                            work.extend(obj.variables.iter().copied());
                            work.push(Register::new(obj.script, 0));
                        }
                    }
                }
                Some(Segment::Lists(table)) => {
                    if let Some(list) = table.get(r.offset) {
                        if marks.slots.insert(r) {
                            work.push(list.first);
                            work.push(list.last);
                            work.extend(list.checkpoints.iter().copied());
                        }
                    }
                }
                Some(Segment::Nodes(table)) => {
                    if let Some(node) = table.get(r.offset) {
                        if marks.slots.insert(r) {
                            work.extend([node.pred, node.succ, node.key, node.value]);
                        }
                    }
                }
                Some(Segment::Hunks(table)) => {
                    if table.is_valid(r.offset) {
                        marks.slots.insert(r);
                    }
                }
                Some(Segment::Stack(_)) | Some(Segment::DynMem(_)) | None => {}
            }
        }
        marks
    }

    fn sweep(&mut self, marks: &Marks) -> GcStats {
        let mut stats = GcStats::default();
        let mut released_scripts = Vec::new();

        let ids: Vec<SegmentId> = self.segment_ids().collect();
        for seg in ids {
            let dead: Vec<u16> = match self.segment(seg) {
                Some(Segment::Clones(t)) => dead_slots(t.iter().map(|(i, _)| i), seg, marks),
                Some(Segment::Lists(t)) => dead_slots(t.iter().map(|(i, _)| i), seg, marks),
                Some(Segment::Nodes(t)) => dead_slots(t.iter().map(|(i, _)| i), seg, marks),
                Some(Segment::Hunks(t)) => dead_slots(t.iter().map(|(i, _)| i), seg, marks),
                Some(Segment::Script(s)) => {
                    if s.marked_as_deleted && !marks.segments.contains(&seg) {
                        released_scripts.push(s.number);
                    }
                    continue;
                }
                _ => continue,
            };

            for offset in dead {
                let r = Register::new(seg, offset);
                match self.segment_mut(seg) {
                    Some(Segment::Clones(t)) => {
                        if let Some(obj) = t.free(offset) {
                            debug!("GC: freeing clone {r}");
                            stats.clones += 1;
                            self.decrement_lockers(obj.script);
                        }
                    }
                    Some(Segment::Lists(t)) => {
                        t.free(offset);
                        stats.lists += 1;
                    }
                    Some(Segment::Nodes(t)) => {
                        t.free(offset);
                        stats.nodes += 1;
                    }
                    Some(Segment::Hunks(t)) => {
                        t.free(offset);
                        stats.hunks += 1;
                    }
                    _ => {}
                }
            }
        }

        for number in released_scripts {
            self.uninstantiate_script(number);
            stats.scripts += 1;
        }

        info!("GC: {stats:?}");
        stats
    }
}

fn dead_slots(live: impl Iterator<Item = u16>, seg: SegmentId, marks: &Marks) -> Vec<u16> {
    live.filter(|&i| !marks.slots.contains(&Register::new(seg, i)))
        .collect()
}
