use std::fmt;

/// A signal destination: positive is a PID, negative is a PGID (the kernel
/// interprets `kill(-pgid, sig)` as "signal the whole group").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target(i32);

impl Target {
    pub fn pid(pid: i32) -> Self {
        debug_assert!(pid > 0, "use Target::pgid for negative identifiers");
        Target(pid)
    }

    pub fn pgid(pgid: i32) -> Self {
        debug_assert!(pgid > 0, "store the pgid's magnitude, not its negation");
        Target(-pgid)
    }

    /// Builds a target directly from a signed value already in "kill syscall"
    /// form, i.e. negative means PGID. Used when replaying user-supplied
    /// `-p` values, which are already expressed this way.
    pub fn from_raw(raw: i32) -> Self {
        Target(raw)
    }

    pub fn is_pgid(self) -> bool {
        self.0 < 0
    }

    /// The raw signed value as passed to `kill`/`killpg`.
    pub fn raw(self) -> i32 {
        self.0
    }

    /// The magnitude: the PID if this is a PID target, the PGID otherwise.
    pub fn magnitude(self) -> i32 {
        self.0.abs()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A deduplicated, unordered collection of [`Target`]s, recomputed by the
/// resolver on every schedule tick. No long-term ownership: build a fresh
/// one whenever the current set is needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet(Vec<Target>);

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, target: Target) {
        if !self.0.contains(&target) {
            self.0.push(target);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.0.iter()
    }

    pub fn contains(&self, target: Target) -> bool {
        self.0.contains(&target)
    }
}

impl FromIterator<Target> for TargetSet {
    fn from_iter<I: IntoIterator<Item = Target>>(iter: I) -> Self {
        let mut set = TargetSet::new();
        for target in iter {
            set.insert(target);
        }
        set
    }
}

impl<'a> IntoIterator for &'a TargetSet {
    type Item = &'a Target;
    type IntoIter = std::slice::Iter<'a, Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_deduplicates() {
        let mut set = TargetSet::new();
        set.insert(Target::pid(100));
        set.insert(Target::pid(100));
        set.insert(Target::pgid(200));
        set.insert(Target::pgid(200));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn pgid_targets_carry_a_negative_raw_value() {
        let t = Target::pgid(42);
        assert!(t.is_pgid());
        assert_eq!(t.raw(), -42);
        assert_eq!(t.magnitude(), 42);
    }
}
