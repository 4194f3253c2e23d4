use parking_lot::Mutex;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::{fmt, mem};

pub trait Recyclable {
    fn new() -> Self;
    fn reset(&mut self);
}

impl Recyclable for Vec<u8> {
    fn new() -> Self {
        Vec::new()
    }

    fn reset(&mut self) {
        self.clear();
    }
}

/// A bounded pool of scratch buffers, shared by concurrent page fills.
pub struct Pool<T> {
    items: Mutex<Vec<T>>,
}

impl<T: Recyclable> Pool<T> {
    pub fn new(size: usize, capacity: usize) -> Self {
        let mut items = Vec::with_capacity(capacity);
        items.resize_with(size, T::new);
        Self {
            items: Mutex::new(items),
        }
    }

    pub fn get(&self) -> Handle<'_, T> {
        let item = self.items.lock().pop().unwrap_or_else(T::new);
        Handle {
            value: ManuallyDrop::new(item),
            pool: self,
        }
    }

    fn return_item(&self, mut item: T) {
        let mut items = self.items.lock();
        if items.len() < items.capacity() {
            item.reset();
            items.push(item);
        }
    }
}

pub struct Handle<'a, T: Recyclable> {
    value: ManuallyDrop<T>,
    pool: &'a Pool<T>,
}

impl<T: Recyclable> Deref for Handle<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: Recyclable> DerefMut for Handle<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

impl<T: fmt::Debug + Recyclable> fmt::Debug for Handle<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: Recyclable> Drop for Handle<'_, T> {
    fn drop(&mut self) {
        let item = unsafe { ManuallyDrop::take(&mut self.value) };
        self.pool.return_item(item);
    }
}
