use std::collections::HashMap;

use super::portal::Portal;

/// Name-keyed collection of portals (§3.2 `PortalHashTable`).
///
/// Full scans (`PreCommit_Portals`, `AtAbort_Portals`, ...) may drop or
/// freeze entries while iterating, which would invalidate a plain
/// `HashMap` iterator. [`PortalTable::retain_scan`] restarts its internal
/// scan whenever the visitor reports a mutation, mirroring the original
/// `hash_seq_search` restart-on-mutation pattern, instead of assuming
/// iterator stability.
#[derive(Default)]
pub struct PortalTable {
    portals: HashMap<String, Portal>,
    unnamed_counter: u64,
}

impl PortalTable {
    pub fn new() -> Self {
        PortalTable {
            portals: HashMap::new(),
            unnamed_counter: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.portals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portals.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.portals.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Portal> {
        self.portals.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Portal> {
        self.portals.get_mut(name)
    }

    pub fn insert(&mut self, portal: Portal) {
        self.portals.insert(portal.name.clone(), portal);
    }

    pub fn remove(&mut self, name: &str) -> Option<Portal> {
        self.portals.remove(name)
    }

    /// Next unnamed-portal counter value. Never decreases, even as
    /// unnamed portals are dropped (§4.2 `CreateNewPortal`), so a stale
    /// handle can never alias a fresh unnamed portal.
    pub fn next_unnamed_name(&mut self, prefix: &str) -> String {
        let name = format!("{} {}>", prefix, self.unnamed_counter);
        self.unnamed_counter += 1;
        name
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.portals.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Portal> {
        self.portals.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Portal> {
        self.portals.values_mut()
    }

    /// Restart-safe driver for the transaction-boundary hooks: `visit` is
    /// called once per portal present at the start of each pass, over
    /// however many passes it takes to reach a pass where nothing is
    /// removed. `visit` returns `true` if it removed (or otherwise wants a
    /// rescan after) its portal, matching the original's "an element was
    /// deleted out from under the scan, start over" behavior. A pass
    /// that removes nothing terminates the scan.
    pub fn retain_scan(&mut self, mut visit: impl FnMut(&mut Portal) -> PortalScanAction) {
        loop {
            let names: Vec<String> = self.portals.keys().cloned().collect();
            let mut mutated = false;
            for name in names {
                let Some(portal) = self.portals.get_mut(&name) else {
                    continue;
                };
                match visit(portal) {
                    PortalScanAction::Keep => {}
                    PortalScanAction::Remove => {
                        self.portals.remove(&name);
                        mutated = true;
                    }
                    PortalScanAction::Restart => {
                        mutated = true;
                    }
                }
            }
            if !mutated {
                break;
            }
        }
    }
}

/// What a `retain_scan` visitor did to the portal it was handed, and
/// whether the table needs to start its pass over as a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalScanAction {
    Keep,
    Remove,
    Restart,
}
