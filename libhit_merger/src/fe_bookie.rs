use fxhash::FxHashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use super::error::FeBookieError;

/// Process-wide lookup from front end id to display name.
///
/// Entries are written once during setup, before any loader threads start, and read from
/// anywhere afterwards. There is no removal.
pub struct FeBookie;

fn book() -> &'static RwLock<FxHashMap<u32, String>> {
    static BOOK: OnceLock<RwLock<FxHashMap<u32, String>>> = OnceLock::new();
    BOOK.get_or_init(|| RwLock::new(FxHashMap::default()))
}

impl FeBookie {
    /// Register a front end. Registering the same id and name twice is allowed; reusing an id
    /// for a different name is not.
    pub fn register(id: u32, name: &str) -> Result<(), FeBookieError> {
        let mut map = book().write().unwrap_or_else(PoisonError::into_inner);
        match map.get(&id) {
            Some(existing) if existing == name => Ok(()),
            Some(existing) => Err(FeBookieError::DuplicateId(id, existing.clone())),
            None => {
                map.insert(id, name.to_string());
                Ok(())
            }
        }
    }

    pub fn name(id: u32) -> Option<String> {
        book()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Name for log messages; falls back to the numeric id
    pub fn display(id: u32) -> String {
        Self::name(id).unwrap_or_else(|| format!("fe{id}"))
    }

    pub fn len() -> usize {
        book().read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The registry is global, so each test uses its own id range

    #[test]
    fn test_register_and_lookup() {
        FeBookie::register(1000, "telescope_0").unwrap();
        FeBookie::register(1001, "telescope_1").unwrap();
        assert_eq!(FeBookie::name(1000).as_deref(), Some("telescope_0"));
        assert_eq!(FeBookie::name(1001).as_deref(), Some("telescope_1"));
        assert_eq!(FeBookie::name(1002), None);
        assert_eq!(FeBookie::display(1002), "fe1002");
        assert!(FeBookie::len() >= 2);
    }

    #[test]
    fn test_write_once() {
        FeBookie::register(2000, "dut").unwrap();
        FeBookie::register(2000, "dut").unwrap();
        match FeBookie::register(2000, "other") {
            Err(FeBookieError::DuplicateId(id, name)) => {
                assert_eq!(id, 2000);
                assert_eq!(name, "dut");
            }
            other => panic!("expected DuplicateId, got {other:?}"),
        }
        assert_eq!(FeBookie::name(2000).as_deref(), Some("dut"));
    }

    #[test]
    fn test_concurrent_readers() {
        FeBookie::register(3000, "reader_target").unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| FeBookie::name(3000)))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().as_deref(), Some("reader_target"));
        }
    }
}
