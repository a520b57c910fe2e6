use std::any::Any;
use std::fmt;

/// Opaque state carried across a hot reload.
///
/// Produced by an extension's `before_reload` and handed back unmodified to the
/// fresh instance's `after_reload`. The host never looks inside.
pub struct ReloadSnapshot(Box<dyn Any + Send>);

impl ReloadSnapshot {
    pub fn new<T: Any + Send>(state: T) -> Self {
        Self(Box::new(state))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn into_inner<T: Any>(self) -> Result<T, Self> {
        match self.0.downcast::<T>() {
            Ok(state) => Ok(*state),
            Err(other) => Err(Self(other)),
        }
    }
}

impl fmt::Debug for ReloadSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReloadSnapshot(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_round_trip() {
        let snapshot = ReloadSnapshot::new(vec![1u8, 2, 3]);
        assert_eq!(snapshot.downcast_ref::<Vec<u8>>(), Some(&vec![1, 2, 3]));
        assert!(snapshot.downcast_ref::<String>().is_none());

        let snapshot = snapshot.into_inner::<String>().unwrap_err();
        assert_eq!(snapshot.into_inner::<Vec<u8>>().unwrap(), vec![1, 2, 3]);
    }
}
