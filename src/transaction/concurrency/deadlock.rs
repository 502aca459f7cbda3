use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::{debug, info};

use crate::common::types::{Rid, TableOid, TxnId};
use super::lock_manager::{LockManager, LockRequestQueue};
use super::transaction::TransactionState;
use super::transaction_manager::TransactionManager;

/// Handle for the background cycle-detection worker; dropping it (or
/// calling shutdown) stops the thread cleanly.
pub struct DeadlockDetector {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeadlockDetector {
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeadlockDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LockManager {
    /// Start the background deadlock detector, running one resolution pass
    /// per interval until the handle is shut down
    pub fn start_cycle_detection(
        self: &Arc<Self>,
        txn_manager: Arc<TransactionManager>,
        interval: Duration,
    ) -> DeadlockDetector {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let lock_manager = self.clone();

        let handle = thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(interval);
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                lock_manager.detect_and_resolve(&txn_manager);
            }
        });

        DeadlockDetector {
            shutdown,
            handle: Some(handle),
        }
    }

    /// One detection pass: build the wait-for graph under both map locks
    /// (table before row, always), abort the youngest transaction of every
    /// cycle, then wake all waiters so victims can unwind.
    pub fn detect_and_resolve(&self, txn_manager: &TransactionManager) -> Vec<TxnId> {
        let table_map = self.table_lock_map.lock();
        let row_map = self.row_lock_map.lock();

        let mut graph = waits_for_graph(&table_map, &row_map);
        let mut victims = Vec::new();

        while let Some(cycle) = find_cycle(&graph) {
            let victim = *cycle.iter().max().expect("cycles are non-empty");
            info!(
                "deadlock cycle {:?} detected; aborting youngest transaction {}",
                cycle, victim
            );

            if let Some(txn) = txn_manager.get(victim) {
                txn.set_state(TransactionState::Aborted);
            }
            graph.remove(&victim);
            victims.push(victim);
        }

        if !victims.is_empty() {
            debug!("aborted {} deadlock victim(s)", victims.len());
        }

        for queue in table_map.values().chain(row_map.values()) {
            queue.cv.notify_all();
        }

        victims
    }

    /// Snapshot of the wait-for graph, for tests and diagnostics
    pub fn wait_for_edges(&self) -> Vec<(TxnId, TxnId)> {
        let table_map = self.table_lock_map.lock();
        let row_map = self.row_lock_map.lock();

        waits_for_graph(&table_map, &row_map)
            .into_iter()
            .flat_map(|(from, tos)| tos.into_iter().map(move |to| (from, to)))
            .collect()
    }
}

/// Every ungranted request waits for every granted request in its queue
fn waits_for_graph(
    table_map: &HashMap<TableOid, Arc<LockRequestQueue>>,
    row_map: &HashMap<Rid, Arc<LockRequestQueue>>,
) -> BTreeMap<TxnId, BTreeSet<TxnId>> {
    let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();

    for queue in table_map.values().chain(row_map.values()) {
        let state = queue.state.lock();
        let granted: Vec<TxnId> = state
            .requests
            .iter()
            .filter(|r| r.granted)
            .map(|r| r.txn_id)
            .collect();

        for request in state.requests.iter().filter(|r| !r.granted) {
            for &holder in &granted {
                if holder != request.txn_id {
                    graph.entry(request.txn_id).or_default().insert(holder);
                }
            }
        }
    }

    graph
}

/// Depth-first search for any cycle, exploring transactions in ascending id
/// order so victim selection is deterministic. Returns the set of
/// transactions on the first cycle found.
fn find_cycle(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<Vec<TxnId>> {
    let mut visited: BTreeSet<TxnId> = BTreeSet::new();

    for &start in graph.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut path = Vec::new();
        if let Some(cycle) = dfs(graph, start, &mut path, &mut visited) {
            return Some(cycle);
        }
    }

    None
}

fn dfs(
    graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
    node: TxnId,
    path: &mut Vec<TxnId>,
    visited: &mut BTreeSet<TxnId>,
) -> Option<Vec<TxnId>> {
    if let Some(pos) = path.iter().position(|&n| n == node) {
        return Some(path[pos..].to_vec());
    }
    if visited.contains(&node) {
        return None;
    }

    path.push(node);
    if let Some(next) = graph.get(&node) {
        for &n in next {
            if let Some(cycle) = dfs(graph, n, path, visited) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    visited.insert(node);

    None
}
