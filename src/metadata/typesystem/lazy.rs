use std::sync::{Arc, OnceLock, RwLock, Weak};

use crate::Result;

/// A value that is populated at most once, on first access.
///
/// Every lazily decoded part of the entity graph goes through this type. The populate
/// closure runs without any lock held by the cell itself, so it may re-enter the metadata
/// reader. If two threads race, both compute a value and the first one stored wins. The
/// reader caches entities by row id, so both computations yield the same objects.
pub struct Lazy<T> {
    cell: OnceLock<T>,
}

impl<T> Default for Lazy<T> {
    fn default() -> Self {
        Lazy {
            cell: OnceLock::new(),
        }
    }
}

impl<T> Lazy<T> {
    /// An unpopulated cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A cell that is already populated with `value`.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Lazy {
            cell: OnceLock::from(value),
        }
    }

    /// The value, if it has been populated.
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// True once the value has been populated.
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Store `value` unless the cell is already populated, and return the stored value.
    pub fn set(&self, value: T) -> &T {
        self.cell.get_or_init(|| value)
    }

    /// Return the value, running `populate` first if the cell is empty.
    ///
    /// # Errors
    /// Propagates the error of `populate`; the cell stays empty in that case.
    pub fn get_or_populate<F>(&self, populate: F) -> Result<&T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }

        let value = populate()?;
        Ok(self.cell.get_or_init(|| value))
    }
}

impl<T: Clone> Lazy<Collection<T>> {
    /// Populate from a vector and return the collection.
    pub(crate) fn load<F>(&self, populate: F) -> Result<&Collection<T>>
    where
        F: FnOnce() -> Result<Vec<T>>,
    {
        self.get_or_populate(|| populate().map(Collection::from_vec))
    }
}

impl<T: Clone> Lazy<Slot<T>> {
    /// Populate the slot and return a copy of its value.
    pub(crate) fn load_value<F>(&self, populate: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        Ok(self.get_or_populate(|| populate().map(Slot::new))?.get())
    }

    /// Populate the slot, then replace its value.
    pub(crate) fn store<F>(&self, populate: F, value: T) -> Result<()>
    where
        F: FnOnce() -> Result<T>,
    {
        self.get_or_populate(|| populate().map(Slot::new))?.set(value);
        Ok(())
    }
}

/// An ordered, shared, mutable list of entities.
pub struct Collection<T> {
    items: RwLock<Vec<T>>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Collection {
            items: RwLock::new(Vec::new()),
        }
    }
}

impl<T: Clone> Collection<T> {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A collection holding `items`.
    #[must_use]
    pub fn from_vec(items: Vec<T>) -> Self {
        Collection {
            items: RwLock::new(items),
        }
    }

    /// A snapshot of the current items.
    pub fn items(&self) -> Vec<T> {
        read_lock!(self.items).clone()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        read_lock!(self.items).len()
    }

    /// True if there are no items.
    pub fn is_empty(&self) -> bool {
        read_lock!(self.items).is_empty()
    }

    /// The item at `index`.
    pub fn get(&self, index: usize) -> Option<T> {
        read_lock!(self.items).get(index).cloned()
    }

    /// Append an item.
    pub fn push(&self, item: T) {
        write_lock!(self.items).push(item);
    }

    /// Remove and return the item at `index`.
    pub fn remove(&self, index: usize) -> Option<T> {
        let mut items = write_lock!(self.items);
        if index < items.len() {
            Some(items.remove(index))
        } else {
            None
        }
    }

    /// Remove all items.
    pub fn clear(&self) {
        write_lock!(self.items).clear();
    }

    /// Keep only the items for which `keep` returns true.
    pub fn retain<F: FnMut(&T) -> bool>(&self, keep: F) {
        write_lock!(self.items).retain(keep);
    }
}

impl<T> Collection<Arc<T>> {
    /// Remove `item`, compared by identity. Returns false if it was not present.
    pub fn remove_item(&self, item: &Arc<T>) -> bool {
        let mut items = write_lock!(self.items);
        match items.iter().position(|candidate| Arc::ptr_eq(candidate, item)) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }

    /// True if `item` is present, compared by identity.
    pub fn contains_item(&self, item: &Arc<T>) -> bool {
        read_lock!(self.items)
            .iter()
            .any(|candidate| Arc::ptr_eq(candidate, item))
    }
}

/// A single mutable value inside an entity.
pub struct Slot<T> {
    value: RwLock<T>,
}

impl<T: Default> Default for Slot<T> {
    fn default() -> Self {
        Slot {
            value: RwLock::new(T::default()),
        }
    }
}

impl<T: Clone> Slot<T> {
    /// A slot holding `value`.
    pub fn new(value: T) -> Self {
        Slot {
            value: RwLock::new(value),
        }
    }

    /// A copy of the current value.
    pub fn get(&self) -> T {
        read_lock!(self.value).clone()
    }

    /// Replace the value.
    pub fn set(&self, value: T) {
        *write_lock!(self.value) = value;
    }
}

/// A non-owning link from a child entity to its owner.
pub struct Backlink<T> {
    target: RwLock<Weak<T>>,
}

impl<T> Default for Backlink<T> {
    fn default() -> Self {
        Backlink {
            target: RwLock::new(Weak::new()),
        }
    }
}

impl<T> Backlink<T> {
    /// A link pointing at `target`.
    pub fn new(target: Weak<T>) -> Self {
        Backlink {
            target: RwLock::new(target),
        }
    }

    /// The owner, if it is still alive and the link has been set.
    pub fn get(&self) -> Option<Arc<T>> {
        read_lock!(self.target).upgrade()
    }

    /// The raw weak pointer.
    pub fn weak(&self) -> Weak<T> {
        read_lock!(self.target).clone()
    }

    /// Point the link at `target`.
    pub fn set(&self, target: &Arc<T>) {
        *write_lock!(self.target) = Arc::downgrade(target);
    }

    /// Point the link at a weak `target`.
    pub fn set_weak(&self, target: Weak<T>) {
        *write_lock!(self.target) = target;
    }

    /// True if the link points at `target`.
    pub fn points_to(&self, target: &Weak<T>) -> bool {
        Weak::ptr_eq(&read_lock!(self.target), target)
    }
}
