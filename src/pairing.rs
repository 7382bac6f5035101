//! # Pairing Table
//!
//! Controller id → robot id. A controller appears at most once as a key;
//! several controllers may point at the same robot.
//!
//! The table only stores the mapping. Checking that the controller exists
//! and maintaining the robot's back-reference is done by the bridge.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct PairingTable {
    pairs: RwLock<HashMap<String, String>>,
}

impl PairingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.pairs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.pairs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Pairs `controller_id` with `robot_id`, returning the robot it was
    /// previously paired with.
    pub fn pair(&self, controller_id: &str, robot_id: &str) -> Option<String> {
        self.write()
            .insert(controller_id.to_string(), robot_id.to_string())
    }

    /// Removes the pairing, returning the robot it pointed at.
    pub fn unpair(&self, controller_id: &str) -> Option<String> {
        self.write().remove(controller_id)
    }

    #[must_use]
    pub fn lookup(&self, controller_id: &str) -> Option<String> {
        self.read().get(controller_id).cloned()
    }

    /// Drops every pairing that targets `robot_id`. Returns the controllers
    /// that were unpaired.
    pub fn remove_robot(&self, robot_id: &str) -> Vec<String> {
        let mut pairs = self.write();
        let controllers: Vec<String> = pairs
            .iter()
            .filter(|(_, robot)| robot.as_str() == robot_id)
            .map(|(controller, _)| controller.clone())
            .collect();
        for controller in &controllers {
            pairs.remove(controller);
        }
        controllers
    }

    /// All pairings, sorted by controller id.
    #[must_use]
    pub fn all(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .read()
            .iter()
            .map(|(c, r)| (c.clone(), r.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_and_lookup() {
        let table = PairingTable::new();
        assert_eq!(table.pair("pad_1", "R1"), None);
        assert_eq!(table.lookup("pad_1").as_deref(), Some("R1"));
        assert_eq!(table.lookup("pad_2"), None);
    }

    #[test]
    fn test_pair_overwrites() {
        let table = PairingTable::new();
        table.pair("pad_1", "R1");
        assert_eq!(table.pair("pad_1", "R2").as_deref(), Some("R1"));
        assert_eq!(table.lookup("pad_1").as_deref(), Some("R2"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_pair_then_unpair() {
        let table = PairingTable::new();
        table.pair("pad_1", "R1");
        assert_eq!(table.unpair("pad_1").as_deref(), Some("R1"));
        assert_eq!(table.lookup("pad_1"), None);
        assert_eq!(table.unpair("pad_1"), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_many_controllers_one_robot() {
        let table = PairingTable::new();
        table.pair("pad_2", "R1");
        table.pair("pad_1", "R1");
        table.pair("pad_3", "R2");
        let mut removed = table.remove_robot("R1");
        removed.sort();
        assert_eq!(removed, vec!["pad_1", "pad_2"]);
        assert_eq!(table.all(), vec![("pad_3".to_string(), "R2".to_string())]);
    }

    #[test]
    fn test_concurrent_pairing() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(PairingTable::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for n in 0..100 {
                        let controller = format!("pad_{}", i);
                        table.pair(&controller, &format!("R{}", n));
                        let _ = table.lookup(&controller);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.len(), 8);
        assert!(table.all().iter().all(|(_, robot)| robot == "R99"));
    }
}
