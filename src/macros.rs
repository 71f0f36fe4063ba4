/// Helper macro for locking items, propagating poisoning as [`crate::Error::LockError`]
///
/// ```rust, ignore
///  let mut state = lock!(self.state);
///  *state = NegotiationState::Queried;
/// ```
macro_rules! lock {
    ($mutex:expr) => {
        $mutex.lock().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for reading locked items, propagating poisoning as [`crate::Error::LockError`]
///
/// ```rust, ignore
///  let registry = read_lock!(self.registry);
///  println!("{}", registry.len());
/// ```
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock.read().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for writing to locked items, propagating poisoning as [`crate::Error::LockError`]
///
/// ```rust, ignore
///  let mut registry = write_lock!(self.registry);
///  registry.register(rule)?;
/// ```
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock.write().map_err(|_| crate::Error::LockError)?
    };
}
