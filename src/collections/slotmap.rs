/// Index-stable table with a free list threaded through the vacant slots.
///
/// Indices double as poller keys, so a released index is handed out again by the
/// next insert and [`SlotMap::next_idx`] can predict it before the value exists.
#[derive(Debug)]
pub struct SlotMap<T> {
    head: u32,
    len: usize,
    entries: Vec<Result<T, u32>>,
}
const NIL: u32 = u32::MAX;

impl<T> SlotMap<T> {
    pub fn new() -> Self {
        Self {
            head: NIL,
            len: 0,
            entries: vec![],
        }
    }
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn get(&mut self, i: usize) -> Option<&mut T> {
        self.entries.get_mut(i).and_then(|r| r.as_mut().ok())
    }
    pub fn next_idx(&self) -> usize {
        if self.head == NIL {
            self.entries.len()
        } else {
            self.head as usize
        }
    }
    pub fn insert(&mut self, value: T) -> usize {
        self.len += 1;
        if self.head == NIL {
            self.entries.push(Ok(value));
            return self.entries.len() - 1;
        }
        let id = self.head as usize;
        match core::mem::replace(&mut self.entries[id], Ok(value)) {
            Err(next) => self.head = next,
            Ok(_) => unreachable!("free list pointed at an occupied slot"),
        }
        id
    }
    pub fn release(&mut self, i: usize) -> Option<T> {
        let slot = self.entries.get_mut(i)?;
        if slot.is_err() {
            return None;
        }
        let value = core::mem::replace(slot, Err(self.head)).ok();
        self.head = i as u32;
        self.len -= 1;
        value
    }
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> + '_ {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(i, e)| e.as_mut().ok().map(|v| (i, v)))
    }
}
impl<T> Default for SlotMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
