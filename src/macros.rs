#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut index = lock!(self.allocations);
///  index.insert(address, allocation);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}
