/// Slot storage for clones, lists, nodes and hunks. A slot's index is the offset half of its reference.
#[derive(Clone, Debug)]
pub struct Table<T> {
    entries: Vec<Option<T>>,
    free_list: Vec<u16>,
}

pub const MAX_TABLE_ENTRIES: usize = 0xffff;

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
        }
    }
}

impl<T> Table<T> {
    pub fn is_full(&self) -> bool {
        self.free_list.is_empty() && self.entries.len() >= MAX_TABLE_ENTRIES
    }

    /// Caller checks `is_full` first
    pub fn allocate(&mut self, value: T) -> u16 {
        if let Some(index) = self.free_list.pop() {
            self.entries[index as usize] = Some(value);
            index
        } else {
            self.entries.push(Some(value));
            (self.entries.len() - 1) as u16
        }
    }

    pub fn get(&self, index: u16) -> Option<&T> {
        self.entries.get(index as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, index: u16) -> Option<&mut T> {
        self.entries.get_mut(index as usize)?.as_mut()
    }

    pub fn is_valid(&self, index: u16) -> bool {
        self.get(index).is_some()
    }

    pub fn free(&mut self, index: u16) -> Option<T> {
        let value = self.entries.get_mut(index as usize)?.take();
        if value.is_some() {
            self.free_list.push(index);
        }
        value
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|v| (i as u16, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
